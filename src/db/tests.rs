use super::{open_connection, CURRENT_SCHEMA_VERSION};
use rusqlite::{params, Connection};
use uuid::Uuid;

/// A throwaway database file, removed with its WAL side files on drop.
struct TempDb {
    path: String,
}

impl TempDb {
    fn new() -> Self {
        let path = std::env::temp_dir()
            .join(format!("shoplist-db-{}.sqlite", Uuid::now_v7()))
            .display()
            .to_string();
        Self { path }
    }

    fn open(&self) -> Connection {
        open_connection(&self.path).expect("connection should open")
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.path));
        }
    }
}

fn pragma_i64(conn: &Connection, name: &str) -> i64 {
    conn.query_row(&format!("PRAGMA {name};"), [], |row| row.get(0))
        .unwrap_or_else(|err| panic!("pragma {name} should be readable: {err}"))
}

#[test]
fn connections_use_wal_and_enforce_generation_cascade() {
    let db = TempDb::new();
    let conn = db.open();

    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .expect("journal_mode should be readable");
    assert_eq!(journal_mode.to_lowercase(), "wal");
    // NORMAL = 1, MEMORY = 2
    assert_eq!(pragma_i64(&conn, "synchronous"), 1);
    assert_eq!(pragma_i64(&conn, "temp_store"), 2);
    assert_eq!(pragma_i64(&conn, "busy_timeout"), 5000);

    conn.execute(
        "INSERT INTO cache_generation (name, installed_at) VALUES ('v1', '2026-01-01T00:00:00Z')",
        [],
    )
    .expect("generation insert");
    conn.execute(
        "INSERT INTO cache_entry (generation, path, position, body, content_type, digest)
         VALUES ('v1', '/', 0, x'00', NULL, 'd')",
        [],
    )
    .expect("entry insert");
    conn.execute("DELETE FROM cache_generation WHERE name = 'v1'", [])
        .expect("generation delete");
    let orphans: i64 = conn
        .query_row("SELECT COUNT(*) FROM cache_entry", [], |row| row.get(0))
        .expect("entry count");
    assert_eq!(orphans, 0, "deleting a generation must drop its entries");
}

#[test]
fn initializes_required_tables_and_schema_version() {
    let db = TempDb::new();
    let conn = db.open();

    let tables = [
        "schema_migrations",
        "meta",
        "items",
        "outbox",
        "cache_generation",
        "cache_entry",
        "sync_task",
    ];
    for table in tables {
        let exists: i64 = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?1)",
                params![table],
                |row| row.get(0),
            )
            .expect("sqlite_master should be readable");
        assert_eq!(exists, 1, "expected table '{}' to exist", table);
    }

    conn.prepare("SELECT rerun FROM sync_task")
        .expect("sync_task should carry the rerun flag");

    let schema_version: String = conn
        .query_row(
            "SELECT value FROM meta WHERE key='schema_version'",
            [],
            |row| row.get(0),
        )
        .expect("schema version should be stored in meta table");
    assert_eq!(schema_version, CURRENT_SCHEMA_VERSION.to_string());

    let delivered: String = conn
        .query_row(
            "SELECT value FROM meta WHERE key='delivered_seq'",
            [],
            |row| row.get(0),
        )
        .expect("delivered cursor default should exist");
    assert_eq!(delivered, "0");

}

#[test]
fn reapplies_migrations_idempotently() {
    let db = TempDb::new();
    let conn_first = db.open();
    super::set_meta(&conn_first, super::META_DELIVERED_SEQ, "7").expect("cursor should be set");
    drop(conn_first);

    let conn_second = db.open();
    let applied_count: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .expect("schema_migrations count should be queryable");
    assert_eq!(applied_count, CURRENT_SCHEMA_VERSION);

    let cursor = super::get_meta_i64(&conn_second, super::META_DELIVERED_SEQ)
        .expect("cursor should be readable");
    assert_eq!(cursor, 7, "reopening must not reset the delivered cursor");

}

#[test]
fn autoincrement_ids_are_not_reused_after_delete() {
    let db = TempDb::new();
    let mut conn = db.open();

    let tx = conn.transaction().expect("tx should open");
    let first = super::insert_item(&tx, "Milk", "Dairy", "2026-01-01T00:00:00Z")
        .expect("insert should work");
    tx.commit().expect("commit should work");

    super::delete_item(&conn, first).expect("delete should work");

    let tx = conn.transaction().expect("tx should open");
    let second = super::insert_item(&tx, "Eggs", "Dairy", "2026-01-01T00:00:01Z")
        .expect("insert should work");
    tx.commit().expect("commit should work");

    assert!(second > first);
}
