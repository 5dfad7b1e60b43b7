use std::error::Error;
use std::fmt;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Registered,
    Running,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Registered => "registered",
            TaskState::Running => "running",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "registered" => Some(TaskState::Registered),
            "running" => Some(TaskState::Running),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskInfo {
    pub tag: String,
    pub state: TaskState,
    pub registration_id: String,
    pub registered_at: String,
    pub attempts: i64,
    /// Registered again while running; completing requeues the task.
    pub rerun: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Registration {
    Registered { registration_id: String },
    Coalesced { registration_id: String, state: TaskState },
}

#[cfg(test)]
impl Registration {
    pub fn registration_id(&self) -> &str {
        match self {
            Registration::Registered { registration_id }
            | Registration::Coalesced {
                registration_id, ..
            } => registration_id,
        }
    }
}

/// A task handed to a runner. Only the holder of the matching registration id
/// can complete or release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub tag: String,
    pub registration_id: String,
    pub attempts: i64,
}

#[derive(Debug)]
pub enum SchedulerError {
    Unsupported,
    Db(rusqlite::Error),
    CorruptState { tag: String, state: String },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::Unsupported => {
                write!(f, "deferred background execution is not supported")
            }
            SchedulerError::Db(err) => write!(f, "scheduler database error: {}", err),
            SchedulerError::CorruptState { tag, state } => {
                write!(f, "sync task '{}' has unknown state '{}'", tag, state)
            }
        }
    }
}

impl Error for SchedulerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SchedulerError::Unsupported => None,
            SchedulerError::Db(err) => Some(err),
            SchedulerError::CorruptState { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for SchedulerError {
    fn from(value: rusqlite::Error) -> Self {
        SchedulerError::Db(value)
    }
}

/// Deferred execution by tag. Registering a tag that is already registered
/// is coalesced into the existing registration; registering one that is
/// running marks it to run once more.
pub trait Scheduler {
    fn register(&self, tag: &str) -> Result<Registration, SchedulerError>;
    /// Takes a registered task, or a running one whose lease has expired.
    fn claim(&self, tag: &str, lease: Duration) -> Result<Option<Claim>, SchedulerError>;
    /// Finishes a claimed task. Returns true when a registration made while
    /// it ran was queued in its place.
    fn complete(&self, claim: &Claim) -> Result<bool, SchedulerError>;
    /// Hands a failed task back for a later retry.
    fn release(&self, claim: &Claim) -> Result<(), SchedulerError>;
    fn task(&self, tag: &str) -> Result<Option<TaskInfo>, SchedulerError>;
}

/// Registrations persisted in the local database so they outlive the process
/// that made them.
pub struct SqliteScheduler {
    conn: Connection,
}

impl SqliteScheduler {
    pub fn open(db_path: &str) -> Result<Self, SchedulerError> {
        Ok(Self {
            conn: db::open_connection(db_path)?,
        })
    }
}

impl Scheduler for SqliteScheduler {
    fn register(&self, tag: &str) -> Result<Registration, SchedulerError> {
        let registration_id = Uuid::now_v7().to_string();
        let (current_id, state) = self.conn.query_row(
            r#"
INSERT INTO sync_task (tag, state, registration_id, registered_at, attempts, rerun)
VALUES (?1, ?2, ?3, ?4, 0, 0)
ON CONFLICT(tag) DO UPDATE
SET rerun = CASE WHEN sync_task.state = ?5 THEN 1 ELSE sync_task.rerun END
RETURNING registration_id, state
"#,
            params![
                tag,
                TaskState::Registered.as_str(),
                registration_id,
                db::now_utc_rfc3339(),
                TaskState::Running.as_str()
            ],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;
        if current_id == registration_id {
            return Ok(Registration::Registered { registration_id });
        }
        let state = TaskState::parse(&state).ok_or_else(|| SchedulerError::CorruptState {
            tag: tag.to_string(),
            state: state.clone(),
        })?;
        Ok(Registration::Coalesced {
            registration_id: current_id,
            state,
        })
    }

    fn claim(&self, tag: &str, lease: Duration) -> Result<Option<Claim>, SchedulerError> {
        let now_ms = db::now_unix_ms();
        let stale_before = now_ms.saturating_sub(lease.as_millis() as i64);
        let claimed = self
            .conn
            .query_row(
                r#"
UPDATE sync_task
SET state = ?2, started_at_ms = ?3
WHERE tag = ?1
  AND (state = ?4 OR (state = ?2 AND started_at_ms < ?5))
RETURNING registration_id, attempts
"#,
                params![
                    tag,
                    TaskState::Running.as_str(),
                    now_ms,
                    TaskState::Registered.as_str(),
                    stale_before
                ],
                |row| {
                    Ok(Claim {
                        tag: tag.to_string(),
                        registration_id: row.get(0)?,
                        attempts: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(claimed)
    }

    fn complete(&self, claim: &Claim) -> Result<bool, SchedulerError> {
        let deleted = self.conn.execute(
            "DELETE FROM sync_task WHERE tag = ?1 AND registration_id = ?2 AND rerun = 0",
            params![claim.tag, claim.registration_id],
        )?;
        if deleted == 1 {
            return Ok(false);
        }
        // Registered again while running: queue a fresh registration.
        let requeued = self.conn.execute(
            r#"
UPDATE sync_task
SET state = ?3, registration_id = ?4, registered_at = ?5,
    started_at_ms = NULL, attempts = 0, rerun = 0
WHERE tag = ?1 AND registration_id = ?2 AND rerun = 1
"#,
            params![
                claim.tag,
                claim.registration_id,
                TaskState::Registered.as_str(),
                Uuid::now_v7().to_string(),
                db::now_utc_rfc3339()
            ],
        )?;
        Ok(requeued == 1)
    }

    fn release(&self, claim: &Claim) -> Result<(), SchedulerError> {
        self.conn.execute(
            r#"
UPDATE sync_task
SET state = ?3, started_at_ms = NULL, attempts = attempts + 1, rerun = 0
WHERE tag = ?1 AND registration_id = ?2
"#,
            params![
                claim.tag,
                claim.registration_id,
                TaskState::Registered.as_str()
            ],
        )?;
        Ok(())
    }

    fn task(&self, tag: &str) -> Result<Option<TaskInfo>, SchedulerError> {
        let row = self
            .conn
            .query_row(
                r#"
SELECT tag, state, registration_id, registered_at, attempts, rerun
FROM sync_task
WHERE tag = ?1
"#,
                params![tag],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)? != 0,
                    ))
                },
            )
            .optional()?;

        let Some((tag, state, registration_id, registered_at, attempts, rerun)) = row else {
            return Ok(None);
        };
        let state = TaskState::parse(&state).ok_or_else(|| SchedulerError::CorruptState {
            tag: tag.clone(),
            state: state.clone(),
        })?;
        Ok(Some(TaskInfo {
            tag,
            state,
            registration_id,
            registered_at,
            attempts,
            rerun,
        }))
    }
}

/// A platform without deferred background execution.
pub struct UnsupportedScheduler;

impl Scheduler for UnsupportedScheduler {
    fn register(&self, _tag: &str) -> Result<Registration, SchedulerError> {
        Err(SchedulerError::Unsupported)
    }

    fn claim(&self, _tag: &str, _lease: Duration) -> Result<Option<Claim>, SchedulerError> {
        Err(SchedulerError::Unsupported)
    }

    fn complete(&self, _claim: &Claim) -> Result<bool, SchedulerError> {
        Err(SchedulerError::Unsupported)
    }

    fn release(&self, _claim: &Claim) -> Result<(), SchedulerError> {
        Err(SchedulerError::Unsupported)
    }

    fn task(&self, _tag: &str) -> Result<Option<TaskInfo>, SchedulerError> {
        Err(SchedulerError::Unsupported)
    }
}
