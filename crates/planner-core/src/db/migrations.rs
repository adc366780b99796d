//! Database migrations

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
            row.get::<_, Option<i32>>(0)
        })
        .optional()?
        .flatten()
        .unwrap_or(0);

    Ok(version)
}

/// Apply `statements` atomically and record `version`
fn apply(conn: &mut Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction()?;
    for stmt in statements {
        tx.execute(stmt, [])?;
    }
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: replicated collections keyed by `(user_id, id)`
fn migrate_v1(conn: &mut Connection) -> Result<()> {
    apply(
        conn,
        1,
        &[
            // Schema version tracking
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS folders (
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                name TEXT,
                color TEXT,
                position INTEGER,
                item_ids TEXT,
                updated_at INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, id)
            )",
            // Pull scans walk (updated_at, id) within one owner
            "CREATE INDEX IF NOT EXISTS idx_folders_pull ON folders(user_id, updated_at, id)",
            "CREATE TABLE IF NOT EXISTS items (
                user_id TEXT NOT NULL,
                id TEXT NOT NULL,
                title TEXT,
                course_code TEXT,
                credits REAL,
                folder_id TEXT,
                completed INTEGER,
                tags TEXT,
                details TEXT,
                updated_at INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (user_id, id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_items_pull ON items(user_id, updated_at, id)",
        ],
    )
}

/// Migration to version 2: planner metadata and semesters, keyed by a
/// surrogate row id with a named `(user_id, uuid)` constraint
fn migrate_v2(conn: &mut Connection) -> Result<()> {
    apply(
        conn,
        2,
        &[
            "CREATE TABLE IF NOT EXISTS planner (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                uuid TEXT NOT NULL,
                name TEXT,
                major TEXT,
                is_default INTEGER,
                semester_uuids TEXT,
                settings TEXT,
                updated_at INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                CONSTRAINT planner_user_id_uuid_key UNIQUE (user_id, uuid)
            )",
            "CREATE INDEX IF NOT EXISTS idx_planner_pull ON planner(user_id, updated_at, uuid)",
            "CREATE TABLE IF NOT EXISTS semesters (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                uuid TEXT NOT NULL,
                planner_uuid TEXT,
                term TEXT,
                year INTEGER,
                notes TEXT,
                course_ids TEXT,
                updated_at INTEGER NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                CONSTRAINT semesters_user_id_uuid_key UNIQUE (user_id, uuid)
            )",
            "CREATE INDEX IF NOT EXISTS idx_semesters_pull ON semesters(user_id, updated_at, uuid)",
        ],
    )?;

    tracing::debug!("Schema is at version {CURRENT_VERSION}");
    Ok(())
}
