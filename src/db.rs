//! Local SQLite database layer.
//!
//! Uses rusqlite with WAL mode and `synchronous = FULL` so a committed queue
//! write survives both a process kill and a power cut. Provides schema
//! migrations and the shared connection state used by the durable store.

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info};

use crate::error::StoreError;

/// Database connection shared by the store. The mutex is the single writer.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Database file name inside the data directory.
pub const DB_FILE_NAME: &str = "offline-queue.db";

/// Open (or create) the queue database at `{data_dir}/offline-queue.db`.
///
/// Unlike a cache, a queue file that fails to open is never deleted: it may
/// hold unsynced sales, so the error is returned to the caller instead.
pub fn init(data_dir: &Path) -> Result<DbState, StoreError> {
    fs::create_dir_all(data_dir).map_err(|source| StoreError::DataDir {
        path: data_dir.display().to_string(),
        source,
    })?;

    let db_path = data_dir.join(DB_FILE_NAME);
    info!("Opening queue database at {}", db_path.display());

    let conn = open_and_configure(&db_path)?;
    run_migrations(&conn)?;

    info!("Queue database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// In-memory database with the full schema. Nothing survives a drop.
pub fn open_in_memory() -> Result<DbState, StoreError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    run_migrations(&conn)?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = FULL;",
    )?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: queued transactions and the metadata row.
fn migrate_v1(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "
        -- queued_transactions (one row per offline-originated action)
        CREATE TABLE IF NOT EXISTS queued_transactions (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            local_id TEXT UNIQUE NOT NULL,
            kind TEXT NOT NULL,
            operation TEXT,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now'))
        );

        -- sync_metadata (single row, id = 1)
        CREATE TABLE IF NOT EXISTS sync_metadata (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_sync_time TEXT,
            updated_at TEXT DEFAULT (datetime('now'))
        );
        INSERT OR IGNORE INTO sync_metadata (id) VALUES (1);

        CREATE INDEX IF NOT EXISTS idx_queued_transactions_status
            ON queued_transactions(status);
        CREATE INDEX IF NOT EXISTS idx_queued_transactions_created_at
            ON queued_transactions(created_at);

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|source| {
        error!("Migration v1 failed: {source}");
        StoreError::Migration { version: 1, source }
    })?;

    info!("Applied migration v1 (queued_transactions, sync_metadata)");
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Migration v2: retry scheduling.
///
/// Adds:
/// - `failure_class` so permanent rejections are not picked up automatically
/// - `next_retry_at` for backoff between retryable failures
fn migrate_v2(conn: &Connection) -> Result<(), StoreError> {
    let apply = |sql: &str| {
        conn.execute_batch(sql).map_err(|source| {
            error!("Migration v2 failed: {source}");
            StoreError::Migration { version: 2, source }
        })
    };

    if !column_exists(conn, "queued_transactions", "failure_class")? {
        apply("ALTER TABLE queued_transactions ADD COLUMN failure_class TEXT;")?;
    }
    if !column_exists(conn, "queued_transactions", "next_retry_at")? {
        apply("ALTER TABLE queued_transactions ADD COLUMN next_retry_at TEXT;")?;
    }
    apply("INSERT INTO schema_version (version) VALUES (2);")?;

    info!("Applied migration v2 (retry scheduling columns)");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
