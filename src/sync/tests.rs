use std::cell::{Cell, RefCell};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;
use uuid::Uuid;

use super::{
    FlushHandler, FlushReport, Registration, RunOutcome, Scheduler, SqliteScheduler,
    SyncCoordinator, SyncError, SyncHandler, TaskState, UnsupportedScheduler,
};
use crate::notify::{Notification, Notifier, NotifyError};
use crate::store::{Store, StoreError};

const TAG: &str = "sync-list";
const LONG_LEASE: Duration = Duration::from_secs(300);

fn unique_db_path() -> String {
    std::env::temp_dir()
        .join(format!("shoplist-sync-{}.sqlite", Uuid::now_v7()))
        .display()
        .to_string()
}

fn cleanup_db_files(path: &str) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{path}{suffix}"));
    }
}

fn coordinator(path: &str, lease: Duration) -> SyncCoordinator {
    let scheduler = SqliteScheduler::open(path).expect("scheduler should open");
    SyncCoordinator::new(Box::new(scheduler), TAG, lease)
}

fn report() -> FlushReport {
    FlushReport {
        delivered: 0,
        cursor: 0,
        notified: true,
    }
}

#[derive(Default)]
struct CountingHandler {
    runs: usize,
    fail_next: bool,
}

impl SyncHandler for CountingHandler {
    fn run(&mut self, _tag: &str) -> Result<FlushReport, SyncError> {
        self.runs += 1;
        if std::mem::take(&mut self.fail_next) {
            return Err(SyncError::Store(StoreError::Unavailable {
                path: "remote".to_string(),
                reason: "remote unreachable".to_string(),
            }));
        }
        Ok(report())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    shown: RefCell<Vec<Notification>>,
    fail: Cell<bool>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.fail.get() {
            return Err(NotifyError::Io(io::Error::other("no display")));
        }
        self.shown.borrow_mut().push(notification.clone());
        Ok(())
    }
}

#[derive(Clone)]
struct BufferWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .expect("log buffer")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for BufferWriter {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[test]
fn duplicate_registrations_run_the_flush_once() {
    let path = unique_db_path();
    let sync = coordinator(&path, LONG_LEASE);

    let first = sync.request_deferred_flush().expect("registration expected");
    let second = sync.request_deferred_flush().expect("registration expected");
    assert!(matches!(first, Registration::Registered { .. }));
    assert!(matches!(
        second,
        Registration::Coalesced {
            state: TaskState::Registered,
            ..
        }
    ));
    assert_eq!(first.registration_id(), second.registration_id());

    let mut handler = CountingHandler::default();
    let outcome = sync.run_pending(&mut handler).expect("run should succeed");
    assert!(matches!(outcome, RunOutcome::Completed { attempts: 1, .. }));
    assert_eq!(
        sync.run_pending(&mut handler).expect("second run"),
        RunOutcome::Idle
    );
    assert_eq!(handler.runs, 1);
    assert!(sync.status().expect("status").task.is_none());

    cleanup_db_files(&path);
}

#[test]
fn change_committed_during_a_flush_is_flushed_by_a_requeued_run() {
    struct LateChangeHandler<'a> {
        flush: FlushHandler<'a>,
        late_store: Store,
        sync: &'a SyncCoordinator,
        seen: Option<Registration>,
    }

    impl SyncHandler for LateChangeHandler<'_> {
        fn run(&mut self, tag: &str) -> Result<FlushReport, SyncError> {
            let report = self.flush.run(tag)?;
            self.late_store.insert("Bread", "Bakery")?;
            self.seen = self.sync.request_deferred_flush();
            Ok(report)
        }
    }

    let path = unique_db_path();
    let mut store = Store::open(&path).expect("store should open");
    store.insert("Milk", "Dairy").expect("insert");
    let sync = coordinator(&path, LONG_LEASE);
    sync.request_deferred_flush().expect("registration expected");

    let notifier = RecordingNotifier::default();
    let notification = Notification {
        title: "t".to_string(),
        body: "b".to_string(),
    };
    let (outcome, seen) = {
        let mut handler = LateChangeHandler {
            flush: FlushHandler::new(&mut store, &notifier, notification.clone(), Duration::ZERO),
            late_store: Store::open(&path).expect("second store should open"),
            sync: &sync,
            seen: None,
        };
        let outcome = sync.run_pending(&mut handler).expect("run should succeed");
        (outcome, handler.seen)
    };
    assert!(matches!(
        seen,
        Some(Registration::Coalesced {
            state: TaskState::Running,
            ..
        })
    ));
    match outcome {
        RunOutcome::Completed {
            requeued, report, ..
        } => {
            assert!(requeued);
            assert_eq!(report.delivered, 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let task = sync.status().expect("status").task.expect("task requeued");
    assert_eq!(task.state, TaskState::Registered);
    assert_eq!(task.attempts, 0);
    assert!(!task.rerun);
    assert_eq!(store.pending_changes().expect("pending").len(), 1);

    let next = {
        let mut handler = FlushHandler::new(&mut store, &notifier, notification, Duration::ZERO);
        sync.run_pending(&mut handler).expect("requeued run")
    };
    match next {
        RunOutcome::Completed {
            requeued, report, ..
        } => {
            assert!(!requeued);
            assert_eq!(report.delivered, 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(store.pending_changes().expect("pending").is_empty());
    assert!(sync.status().expect("status").task.is_none());

    cleanup_db_files(&path);
}

#[test]
fn failed_flush_is_retried_on_the_next_run() {
    let path = unique_db_path();
    let sync = coordinator(&path, LONG_LEASE);
    sync.request_deferred_flush().expect("registration expected");

    let mut handler = CountingHandler {
        runs: 0,
        fail_next: true,
    };
    let err = sync
        .run_pending(&mut handler)
        .expect_err("handler failure should surface to the runner");
    assert!(matches!(err, SyncError::Store(_)));

    let task = sync.status().expect("status").task.expect("task kept");
    assert_eq!(task.state, TaskState::Registered);
    assert_eq!(task.attempts, 1);

    let outcome = sync.run_pending(&mut handler).expect("retry should succeed");
    assert!(matches!(outcome, RunOutcome::Completed { attempts: 2, .. }));
    assert_eq!(handler.runs, 2);

    cleanup_db_files(&path);
}

#[test]
fn running_task_is_reclaimed_after_its_lease_expires() {
    let path = unique_db_path();
    let scheduler = SqliteScheduler::open(&path).expect("scheduler should open");
    scheduler.register(TAG).expect("register");
    let abandoned = scheduler
        .claim(TAG, LONG_LEASE)
        .expect("claim")
        .expect("task should be claimable");
    assert!(scheduler
        .claim(TAG, LONG_LEASE)
        .expect("claim")
        .is_none());

    std::thread::sleep(Duration::from_millis(5));
    let reclaimed = scheduler
        .claim(TAG, Duration::from_millis(1))
        .expect("claim")
        .expect("expired lease should be reclaimable");
    assert_eq!(reclaimed.registration_id, abandoned.registration_id);

    scheduler.complete(&reclaimed).expect("complete");
    assert!(scheduler.task(TAG).expect("task").is_none());

    cleanup_db_files(&path);
}

#[test]
fn registrations_outlive_the_registering_process() {
    let path = unique_db_path();
    {
        let sync = coordinator(&path, LONG_LEASE);
        sync.request_deferred_flush().expect("registration expected");
    }

    let sync = coordinator(&path, LONG_LEASE);
    let task = sync.status().expect("status").task.expect("task persisted");
    assert_eq!(task.tag, TAG);
    assert_eq!(task.state, TaskState::Registered);

    cleanup_db_files(&path);
}

#[test]
fn unsupported_scheduler_degrades_with_a_warning() {
    let sync = SyncCoordinator::new(Box::new(UnsupportedScheduler), TAG, LONG_LEASE);

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BufferWriter {
            buffer: buffer.clone(),
        })
        .with_max_level(Level::WARN)
        .with_ansi(false)
        .finish();
    let dispatch = tracing::Dispatch::new(subscriber);
    let registration =
        tracing::dispatcher::with_default(&dispatch, || sync.request_deferred_flush());
    assert!(registration.is_none());

    let logs = String::from_utf8(buffer.lock().expect("log buffer").clone()).expect("utf8 logs");
    assert!(logs.contains("background sync unsupported"));

    let mut handler = CountingHandler::default();
    assert_eq!(
        sync.run_pending(&mut handler).expect("run"),
        RunOutcome::Foreground { report: report() }
    );
    assert_eq!(handler.runs, 1);
    assert!(!sync.status().expect("status").supported);
}

#[test]
fn flush_handler_delivers_pending_changes_and_notifies() {
    let path = unique_db_path();
    let mut store = Store::open(&path).expect("store should open");
    store.insert("Milk", "Dairy").expect("insert");
    store.insert("Eggs", "Dairy").expect("insert");

    let sync = coordinator(&path, LONG_LEASE);
    sync.request_deferred_flush().expect("registration expected");

    let notifier = RecordingNotifier::default();
    let notification = Notification {
        title: "List synchronized".to_string(),
        body: "saved".to_string(),
    };
    let outcome = {
        let mut handler =
            FlushHandler::new(&mut store, &notifier, notification.clone(), Duration::ZERO);
        sync.run_pending(&mut handler).expect("run should succeed")
    };
    match outcome {
        RunOutcome::Completed { report, .. } => {
            assert_eq!(report.delivered, 2);
            assert!(report.notified);
            assert_eq!(report.cursor, store.delivered_seq().expect("cursor"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(store.pending_changes().expect("pending").is_empty());
    assert_eq!(notifier.shown.borrow().as_slice(), &[notification.clone()]);

    let cursor = store.delivered_seq().expect("cursor");
    let again = FlushHandler::new(&mut store, &notifier, notification, Duration::ZERO)
        .run(TAG)
        .expect("re-running the flush is safe");
    assert_eq!(again.delivered, 0);
    assert_eq!(again.cursor, cursor);
    assert_eq!(notifier.shown.borrow().len(), 2);

    cleanup_db_files(&path);
}

#[test]
fn notification_failure_does_not_fail_the_flush() {
    let path = unique_db_path();
    let mut store = Store::open(&path).expect("store should open");
    store.insert("Milk", "Dairy").expect("insert");

    let notifier = RecordingNotifier::default();
    notifier.fail.set(true);
    let report = FlushHandler::new(
        &mut store,
        &notifier,
        Notification {
            title: "t".to_string(),
            body: "b".to_string(),
        },
        Duration::ZERO,
    )
    .run(TAG)
    .expect("flush should succeed");
    assert_eq!(report.delivered, 1);
    assert!(!report.notified);

    cleanup_db_files(&path);
}
