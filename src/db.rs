use std::time::Duration;

use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Result};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const CURRENT_SCHEMA_VERSION: i64 = 5;

pub const META_SCHEMA_VERSION: &str = "schema_version";
pub const META_DELIVERED_SEQ: &str = "delivered_seq";
pub const META_ACTIVE_GENERATION: &str = "active_generation";

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: [Migration; 5] = [
    Migration {
        version: 1,
        name: "item_store_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    category TEXT NOT NULL,
    done INTEGER NOT NULL DEFAULT 0,
    timestamp TEXT NOT NULL
);
"#,
    },
    Migration {
        version: 2,
        name: "change_outbox_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS outbox (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#,
    },
    Migration {
        version: 3,
        name: "asset_cache_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS cache_generation (
    name TEXT PRIMARY KEY,
    installed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cache_entry (
    generation TEXT NOT NULL REFERENCES cache_generation(name) ON DELETE CASCADE,
    path TEXT NOT NULL,
    position INTEGER NOT NULL,
    body BLOB NOT NULL,
    content_type TEXT,
    digest TEXT NOT NULL,
    PRIMARY KEY (generation, path)
);
"#,
    },
    Migration {
        version: 4,
        name: "sync_task_v1",
        sql: r#"
CREATE TABLE IF NOT EXISTS sync_task (
    tag TEXT PRIMARY KEY,
    state TEXT NOT NULL,
    registration_id TEXT NOT NULL,
    registered_at TEXT NOT NULL,
    started_at_ms INTEGER,
    attempts INTEGER NOT NULL DEFAULT 0
);
"#,
    },
    Migration {
        version: 5,
        name: "sync_task_rerun_v1",
        sql: r#"
ALTER TABLE sync_task ADD COLUMN rerun INTEGER NOT NULL DEFAULT 0;
"#,
    },
];

pub fn open_connection(path: &str) -> Result<Connection> {
    let mut conn = Connection::open(path)?;
    configure_for_speed(&conn)?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

fn configure_for_speed(conn: &Connection) -> Result<()> {
    conn.pragma_update(None::<DatabaseName>, "journal_mode", "WAL")?;
    conn.pragma_update(None::<DatabaseName>, "synchronous", "NORMAL")?;
    conn.pragma_update(None::<DatabaseName>, "foreign_keys", "ON")?;
    conn.pragma_update(None::<DatabaseName>, "temp_store", "MEMORY")?;
    conn.pragma_update(None::<DatabaseName>, "busy_timeout", 5000i64)?;
    conn.busy_timeout(Duration::from_millis(5000))?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#,
    )?;

    for migration in MIGRATIONS {
        let already_applied: Option<i64> = tx
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;

        if already_applied.is_some() {
            continue;
        }

        tracing::debug!(
            version = migration.version,
            name = migration.name,
            "applying schema migration"
        );
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, now_utc_rfc3339()],
        )?;
    }

    tx.execute(
        r#"
INSERT INTO meta (key, value)
VALUES (?1, ?2)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![META_SCHEMA_VERSION, CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    tx.execute(
        r#"
INSERT INTO meta (key, value)
VALUES (?1, '0')
ON CONFLICT(key) DO NOTHING
"#,
        params![META_DELIVERED_SEQ],
    )?;

    tx.commit()
}

pub fn now_utc_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}

pub fn now_unix_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRow {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub done: bool,
    pub timestamp: String,
}

fn item_from_row(row: &rusqlite::Row<'_>) -> Result<ItemRow> {
    Ok(ItemRow {
        id: row.get(0)?,
        name: row.get(1)?,
        category: row.get(2)?,
        done: row.get::<_, i64>(3)? != 0,
        timestamp: row.get(4)?,
    })
}

pub fn insert_item(conn: &Connection, name: &str, category: &str, timestamp: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO items (name, category, done, timestamp) VALUES (?1, ?2, 0, ?3)",
        params![name, category, timestamp],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_item(conn: &Connection, id: i64) -> Result<Option<ItemRow>> {
    conn.query_row(
        "SELECT id, name, category, done, timestamp FROM items WHERE id = ?1",
        params![id],
        item_from_row,
    )
    .optional()
}

pub fn set_item_done(conn: &Connection, id: i64, done: bool) -> Result<usize> {
    conn.execute(
        "UPDATE items SET done = ?2 WHERE id = ?1",
        params![id, i64::from(done)],
    )
}

pub fn delete_item(conn: &Connection, id: i64) -> Result<usize> {
    conn.execute("DELETE FROM items WHERE id = ?1", params![id])
}

pub fn list_items(conn: &Connection) -> Result<Vec<ItemRow>> {
    let mut stmt =
        conn.prepare("SELECT id, name, category, done, timestamp FROM items ORDER BY id ASC")?;
    let mut rows = stmt.query([])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(item_from_row(row)?);
    }
    Ok(result)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRow {
    pub seq: i64,
    pub item_id: i64,
    pub kind: String,
    pub payload: String,
    pub created_at: String,
}

pub fn append_outbox(conn: &Connection, item_id: i64, kind: &str, payload: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO outbox (item_id, kind, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![item_id, kind, payload, now_utc_rfc3339()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_outbox_after(conn: &Connection, after_seq: i64) -> Result<Vec<OutboxRow>> {
    let mut stmt = conn.prepare(
        r#"
SELECT seq, item_id, kind, payload, created_at
FROM outbox
WHERE seq > ?1
ORDER BY seq ASC
"#,
    )?;
    let mut rows = stmt.query(params![after_seq])?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        result.push(OutboxRow {
            seq: row.get(0)?,
            item_id: row.get(1)?,
            kind: row.get(2)?,
            payload: row.get(3)?,
            created_at: row.get(4)?,
        });
    }
    Ok(result)
}

pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO meta (key, value)
VALUES (?1, ?2)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![key, value],
    )?;
    Ok(())
}

pub fn get_meta_i64(conn: &Connection, key: &str) -> Result<i64> {
    Ok(get_meta(conn, key)?
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(0))
}

#[cfg(test)]
mod tests;
