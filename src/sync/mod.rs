use std::error::Error;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

mod flush;
mod scheduler;

pub use flush::{FlushHandler, FlushReport};
#[cfg(test)]
pub use scheduler::TaskState;
pub use scheduler::{
    Registration, Scheduler, SchedulerError, SqliteScheduler, TaskInfo, UnsupportedScheduler,
};

/// Work executed when the scheduler runs a task.
pub trait SyncHandler {
    fn run(&mut self, tag: &str) -> Result<FlushReport, SyncError>;
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// No task was registered for the tag.
    Idle,
    /// No deferred execution on this platform; the flush ran in the
    /// foreground without a registration.
    Foreground { report: FlushReport },
    Completed {
        registration_id: String,
        attempts: i64,
        /// A registration made during the run is queued for the next one.
        requeued: bool,
        report: FlushReport,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SyncStatus {
    pub tag: String,
    pub supported: bool,
    pub task: Option<TaskInfo>,
}

/// Bridges committed mutations to a deferred flush under a single tag.
pub struct SyncCoordinator {
    scheduler: Box<dyn Scheduler>,
    tag: String,
    lease: Duration,
}

impl SyncCoordinator {
    pub fn new(scheduler: Box<dyn Scheduler>, tag: &str, lease: Duration) -> Self {
        Self {
            scheduler,
            tag: tag.to_string(),
            lease,
        }
    }

    /// Registers the flush task. Failures are logged and absorbed; without
    /// background support changes are only flushed by an explicit run.
    pub fn request_deferred_flush(&self) -> Option<Registration> {
        match self.scheduler.register(&self.tag) {
            Ok(registration) => {
                match &registration {
                    Registration::Registered { registration_id } => {
                        tracing::debug!(tag = %self.tag, %registration_id, "deferred flush registered");
                    }
                    Registration::Coalesced {
                        registration_id,
                        state,
                    } => {
                        tracing::debug!(
                            tag = %self.tag,
                            %registration_id,
                            ?state,
                            "deferred flush already pending"
                        );
                    }
                }
                Some(registration)
            }
            Err(SchedulerError::Unsupported) => {
                tracing::warn!(
                    tag = %self.tag,
                    "background sync unsupported; changes stay local until a foreground flush"
                );
                None
            }
            Err(err) => {
                tracing::warn!(tag = %self.tag, error = %err, "failed to register deferred flush");
                None
            }
        }
    }

    /// Runs the registered task, if any. A failed handler puts the task back
    /// so the next run retries it. Without a scheduler the handler runs
    /// directly.
    pub fn run_pending(&self, handler: &mut dyn SyncHandler) -> Result<RunOutcome, SyncError> {
        let claim = match self.scheduler.claim(&self.tag, self.lease) {
            Ok(Some(claim)) => claim,
            Ok(None) => return Ok(RunOutcome::Idle),
            Err(SchedulerError::Unsupported) => {
                tracing::info!(tag = %self.tag, "background sync unsupported; flushing in the foreground");
                let report = handler.run(&self.tag)?;
                return Ok(RunOutcome::Foreground { report });
            }
            Err(err) => return Err(SyncError::Scheduler(err)),
        };
        tracing::debug!(
            tag = %self.tag,
            registration_id = %claim.registration_id,
            attempts = claim.attempts,
            "sync task claimed"
        );

        match handler.run(&self.tag) {
            Ok(report) => {
                let requeued = self.scheduler.complete(&claim)?;
                if requeued {
                    tracing::debug!(
                        tag = %self.tag,
                        "registered again while running; task requeued"
                    );
                }
                Ok(RunOutcome::Completed {
                    registration_id: claim.registration_id,
                    attempts: claim.attempts + 1,
                    requeued,
                    report,
                })
            }
            Err(err) => {
                tracing::warn!(
                    tag = %self.tag,
                    registration_id = %claim.registration_id,
                    error = %err,
                    "flush failed; task kept for retry"
                );
                self.scheduler.release(&claim)?;
                Err(err)
            }
        }
    }

    pub fn status(&self) -> Result<SyncStatus, SyncError> {
        match self.scheduler.task(&self.tag) {
            Ok(task) => Ok(SyncStatus {
                tag: self.tag.clone(),
                supported: true,
                task,
            }),
            Err(SchedulerError::Unsupported) => Ok(SyncStatus {
                tag: self.tag.clone(),
                supported: false,
                task: None,
            }),
            Err(err) => Err(SyncError::Scheduler(err)),
        }
    }
}

#[derive(Debug)]
pub enum SyncError {
    Scheduler(SchedulerError),
    Store(crate::store::StoreError),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Scheduler(err) => write!(f, "scheduler error: {}", err),
            SyncError::Store(err) => write!(f, "{}", err),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SyncError::Scheduler(err) => Some(err),
            SyncError::Store(err) => Some(err),
        }
    }
}

impl From<SchedulerError> for SyncError {
    fn from(value: SchedulerError) -> Self {
        SyncError::Scheduler(value)
    }
}

impl From<crate::store::StoreError> for SyncError {
    fn from(value: crate::store::StoreError) -> Self {
        SyncError::Store(value)
    }
}

#[cfg(test)]
mod tests;
