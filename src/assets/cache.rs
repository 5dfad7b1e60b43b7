use rusqlite::{params, Connection, OptionalExtension, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::db::{self, META_ACTIVE_GENERATION};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResource {
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub digest: String,
}

impl CachedResource {
    pub fn new(key: String, body: Vec<u8>, content_type: Option<String>) -> Self {
        let digest = content_digest(&body);
        Self {
            key,
            body,
            content_type,
            digest,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GenerationSummary {
    pub name: String,
    pub installed_at: String,
    pub entries: u64,
    pub bytes: u64,
    pub active: bool,
}

pub fn content_digest(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Replaces `name` with exactly `resources`. Callers run this inside the
/// transaction that decides whether the generation exists at all.
pub fn put_generation(conn: &Connection, name: &str, resources: &[CachedResource]) -> Result<()> {
    conn.execute("DELETE FROM cache_generation WHERE name = ?1", params![name])?;
    conn.execute(
        "INSERT INTO cache_generation (name, installed_at) VALUES (?1, ?2)",
        params![name, db::now_utc_rfc3339()],
    )?;
    let mut stmt = conn.prepare(
        r#"
INSERT INTO cache_entry (generation, path, position, body, content_type, digest)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
    )?;
    for (position, resource) in resources.iter().enumerate() {
        stmt.execute(params![
            name,
            resource.key,
            position as i64,
            resource.body,
            resource.content_type,
            resource.digest
        ])?;
    }
    Ok(())
}

pub fn generation_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM cache_generation WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn generation_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM cache_generation ORDER BY installed_at, name")?;
    let mut rows = stmt.query([])?;
    let mut names = Vec::new();
    while let Some(row) = rows.next()? {
        names.push(row.get(0)?);
    }
    Ok(names)
}

pub fn delete_generation(conn: &Connection, name: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM cache_generation WHERE name = ?1", params![name])?;
    Ok(removed > 0)
}

pub fn active_generation(conn: &Connection) -> Result<Option<String>> {
    db::get_meta(conn, META_ACTIVE_GENERATION)
}

pub fn set_active_generation(conn: &Connection, name: &str) -> Result<()> {
    db::set_meta(conn, META_ACTIVE_GENERATION, name)
}

/// Looks `key` up in whichever generation is active when the statement runs,
/// so a lookup never mixes two generations.
pub fn match_active(conn: &Connection, key: &str) -> Result<Option<(String, CachedResource)>> {
    conn.query_row(
        r#"
SELECT e.generation, e.path, e.body, e.content_type, e.digest
FROM cache_entry e
JOIN meta m ON m.key = ?1 AND m.value = e.generation
WHERE e.path = ?2
"#,
        params![META_ACTIVE_GENERATION, key],
        |row| {
            Ok((
                row.get(0)?,
                CachedResource {
                    key: row.get(1)?,
                    body: row.get(2)?,
                    content_type: row.get(3)?,
                    digest: row.get(4)?,
                },
            ))
        },
    )
    .optional()
}

pub fn list_entries(conn: &Connection, generation: &str) -> Result<Vec<CachedResource>> {
    let mut stmt = conn.prepare(
        r#"
SELECT path, body, content_type, digest
FROM cache_entry
WHERE generation = ?1
ORDER BY position ASC
"#,
    )?;
    let mut rows = stmt.query(params![generation])?;
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(CachedResource {
            key: row.get(0)?,
            body: row.get(1)?,
            content_type: row.get(2)?,
            digest: row.get(3)?,
        });
    }
    Ok(entries)
}

pub fn generation_summaries(conn: &Connection) -> Result<Vec<GenerationSummary>> {
    let active = active_generation(conn)?;
    let mut stmt = conn.prepare(
        r#"
SELECT g.name, g.installed_at, COUNT(e.path), COALESCE(SUM(LENGTH(e.body)), 0)
FROM cache_generation g
LEFT JOIN cache_entry e ON e.generation = g.name
GROUP BY g.name, g.installed_at
ORDER BY g.installed_at, g.name
"#,
    )?;
    let mut rows = stmt.query([])?;
    let mut summaries = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(0)?;
        summaries.push(GenerationSummary {
            active: active.as_deref() == Some(name.as_str()),
            name,
            installed_at: row.get(1)?,
            entries: row.get::<_, i64>(2)? as u64,
            bytes: row.get::<_, i64>(3)? as u64,
        });
    }
    Ok(summaries)
}
