use std::error::Error;
use std::fmt;
use std::path::Path;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::db::{self, ItemRow, OutboxRow, META_DELIVERED_SEQ};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Record {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub done: bool,
    pub timestamp: String,
}

impl From<ItemRow> for Record {
    fn from(value: ItemRow) -> Self {
        Self {
            id: value.id,
            name: value.name,
            category: value.category,
            done: value.done,
            timestamp: value.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Insert,
    SetDone,
    Remove,
}

impl MutationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Insert => "insert",
            MutationKind::SetDone => "set_done",
            MutationKind::Remove => "remove",
        }
    }
}

/// What a committed mutation did. `change_seq` is the outbox position of the
/// change, absent when the target record did not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Commit {
    pub kind: MutationKind,
    pub applied: bool,
    pub change_seq: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PendingChange {
    pub seq: i64,
    pub item_id: i64,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

impl From<OutboxRow> for PendingChange {
    fn from(value: OutboxRow) -> Self {
        let payload = serde_json::from_str(&value.payload)
            .unwrap_or(serde_json::Value::String(value.payload));
        Self {
            seq: value.seq,
            item_id: value.item_id,
            kind: value.kind,
            payload,
            created_at: value.created_at,
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    Unavailable { path: String, reason: String },
    Db(rusqlite::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable { path, reason } => {
                write!(f, "local store '{}' is unavailable: {}", path, reason)
            }
            StoreError::Db(err) => write!(f, "local store error: {}", err),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Unavailable { .. } => None,
            StoreError::Db(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        StoreError::Db(value)
    }
}

/// Durable checklist storage. Every mutation runs in its own transaction and
/// records an outbox entry alongside the data change.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let unavailable = |reason: String| StoreError::Unavailable {
            path: path.to_string(),
            reason,
        };
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| unavailable(err.to_string()))?;
            }
        }
        let conn = db::open_connection(path).map_err(|err| unavailable(err.to_string()))?;
        Ok(Self { conn })
    }

    pub fn insert(&mut self, name: &str, category: &str) -> Result<Commit, StoreError> {
        let tx = self.conn.transaction()?;
        let timestamp = db::now_utc_rfc3339();
        let id = db::insert_item(&tx, name, category, &timestamp)?;
        let payload = json!({
            "id": id,
            "name": name,
            "category": category,
            "done": false,
            "timestamp": timestamp,
        });
        let seq = db::append_outbox(&tx, id, MutationKind::Insert.as_str(), &payload.to_string())?;
        tx.commit()?;
        tracing::debug!(id, seq, "record inserted");
        Ok(Commit {
            kind: MutationKind::Insert,
            applied: true,
            change_seq: Some(seq),
        })
    }

    /// Absent ids are a silent no-op.
    pub fn set_done(&mut self, id: i64, done: bool) -> Result<Commit, StoreError> {
        let tx = self.conn.transaction()?;
        let Some(record) = db::get_item(&tx, id)? else {
            tracing::debug!(id, "set_done on absent record ignored");
            return Ok(not_applied(MutationKind::SetDone));
        };
        db::set_item_done(&tx, id, done)?;
        let payload = json!({
            "id": id,
            "name": record.name,
            "category": record.category,
            "done": done,
            "timestamp": record.timestamp,
        });
        let seq = db::append_outbox(&tx, id, MutationKind::SetDone.as_str(), &payload.to_string())?;
        tx.commit()?;
        tracing::debug!(id, done, seq, "record updated");
        Ok(Commit {
            kind: MutationKind::SetDone,
            applied: true,
            change_seq: Some(seq),
        })
    }

    /// Absent ids are a silent no-op.
    pub fn remove(&mut self, id: i64) -> Result<Commit, StoreError> {
        let tx = self.conn.transaction()?;
        if db::delete_item(&tx, id)? == 0 {
            tracing::debug!(id, "remove of absent record ignored");
            return Ok(not_applied(MutationKind::Remove));
        }
        let seq = db::append_outbox(
            &tx,
            id,
            MutationKind::Remove.as_str(),
            &json!({ "id": id }).to_string(),
        )?;
        tx.commit()?;
        tracing::debug!(id, seq, "record removed");
        Ok(Commit {
            kind: MutationKind::Remove,
            applied: true,
            change_seq: Some(seq),
        })
    }

    pub fn list_all(&self) -> Result<Vec<Record>, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let records = db::list_items(&tx)?
            .into_iter()
            .map(Record::from)
            .collect();
        tx.commit()?;
        Ok(records)
    }

    pub fn get(&self, id: i64) -> Result<Option<Record>, StoreError> {
        Ok(db::get_item(&self.conn, id)?.map(Record::from))
    }

    pub fn delivered_seq(&self) -> Result<i64, StoreError> {
        Ok(db::get_meta_i64(&self.conn, META_DELIVERED_SEQ)?)
    }

    /// Outbox entries not yet covered by the delivered cursor.
    pub fn pending_changes(&self) -> Result<Vec<PendingChange>, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let cursor = db::get_meta_i64(&tx, META_DELIVERED_SEQ)?;
        let changes = db::list_outbox_after(&tx, cursor)?
            .into_iter()
            .map(PendingChange::from)
            .collect();
        tx.commit()?;
        Ok(changes)
    }

    /// Moves the delivered cursor forward to `seq`. Never moves it back, so a
    /// repeated flush of the same batch is harmless.
    pub fn mark_delivered(&mut self, seq: i64) -> Result<i64, StoreError> {
        let tx = self.conn.transaction()?;
        let current = db::get_meta_i64(&tx, META_DELIVERED_SEQ)?;
        let next = current.max(seq);
        if next != current {
            db::set_meta(&tx, META_DELIVERED_SEQ, &next.to_string())?;
        }
        tx.commit()?;
        Ok(next)
    }
}

fn not_applied(kind: MutationKind) -> Commit {
    Commit {
        kind,
        applied: false,
        change_seq: None,
    }
}
