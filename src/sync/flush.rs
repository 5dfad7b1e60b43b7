use std::thread;
use std::time::Duration;

use serde::Serialize;

use super::{SyncError, SyncHandler};
use crate::notify::{Notification, Notifier};
use crate::store::Store;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: u64,
    pub cursor: i64,
    pub notified: bool,
}

/// Flushes pending list changes. There is no backend: the remote write is a
/// fixed delay, after which the delivered cursor moves past the batch that
/// was read and the user is notified.
pub struct FlushHandler<'a> {
    store: &'a mut Store,
    notifier: &'a dyn Notifier,
    notification: Notification,
    delay: Duration,
}

impl<'a> FlushHandler<'a> {
    pub fn new(
        store: &'a mut Store,
        notifier: &'a dyn Notifier,
        notification: Notification,
        delay: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            notification,
            delay,
        }
    }
}

impl SyncHandler for FlushHandler<'_> {
    fn run(&mut self, tag: &str) -> Result<FlushReport, SyncError> {
        let batch = self.store.pending_changes()?;
        tracing::info!(tag, pending = batch.len(), "flushing pending list changes");

        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let cursor = match batch.last() {
            Some(last) => self.store.mark_delivered(last.seq)?,
            None => self.store.delivered_seq()?,
        };

        let notified = match self.notifier.notify(&self.notification) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "sync notification could not be shown");
                false
            }
        };

        tracing::info!(tag, delivered = batch.len(), cursor, "flush complete");
        Ok(FlushReport {
            delivered: batch.len() as u64,
            cursor,
            notified,
        })
    }
}
