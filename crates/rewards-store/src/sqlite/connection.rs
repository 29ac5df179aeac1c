//! Opening the store's single `SQLite` connection.
//!
//! Every open applies the same pragma batch: journal mode, busy timeout,
//! foreign keys, page cache size and synchronous mode.

use std::path::PathBuf;

use rusqlite::{Connection, OpenFlags};
use tracing::info;

use crate::errors::{Result, StoreError};

/// Where the database lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreLocation {
    /// A file on disk; parent directories are created on open.
    File(PathBuf),
    /// A private in-memory database (lost on close).
    Memory,
}

/// Configuration for the store connection.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Database location.
    pub location: StoreLocation,
    /// Busy timeout in milliseconds (default: 5000).
    pub busy_timeout_ms: u32,
    /// Page cache size in KiB (default: 2048).
    pub cache_size_kib: i64,
    /// Journal mode pragma value (default: `WAL`).
    pub journal_mode: String,
    /// Whether foreign keys are enforced (default: true).
    pub foreign_keys: bool,
}

impl StoreConfig {
    /// File-backed configuration with defaults.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: StoreLocation::File(path.into()),
            ..Self::default()
        }
    }

    /// In-memory configuration with defaults.
    pub fn memory() -> Self {
        Self::default()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: StoreLocation::Memory,
            busy_timeout_ms: 5_000,
            cache_size_kib: 2_048,
            journal_mode: "WAL".to_string(),
            foreign_keys: true,
        }
    }
}

/// Open a connection and apply the configured pragmas.
pub fn open(config: &StoreConfig) -> Result<Connection> {
    let conn = match &config.location {
        StoreLocation::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| StoreError::Open(format!("{}: {e}", path.display())))?
        }
        StoreLocation::Memory => {
            Connection::open_in_memory().map_err(|e| StoreError::Open(e.to_string()))?
        }
    };

    apply_pragmas(&conn, config).map_err(|e| StoreError::Open(format!("pragmas: {e}")))?;

    info!(location = ?config.location, "store connection opened");
    Ok(conn)
}

fn apply_pragmas(conn: &Connection, config: &StoreConfig) -> rusqlite::Result<()> {
    // journal_mode returns a row, so it cannot go through execute_batch.
    let _mode: String = conn.query_row(
        &format!("PRAGMA journal_mode = {}", config.journal_mode),
        [],
        |row| row.get(0),
    )?;
    conn.execute_batch(&format!(
        "PRAGMA busy_timeout = {};\
         PRAGMA foreign_keys = {};\
         PRAGMA cache_size = -{};\
         PRAGMA synchronous = NORMAL;",
        config.busy_timeout_ms,
        if config.foreign_keys { "ON" } else { "OFF" },
        config.cache_size_kib,
    ))
}

/// Pragma state for verification.
#[derive(Debug)]
pub struct PragmaState {
    /// Effective journal mode (`wal`, or `memory` for in-memory databases).
    pub journal_mode: String,
    /// Whether foreign keys are enforced.
    pub foreign_keys_enabled: bool,
}

/// Read back the pragmas that matter for correctness.
pub fn verify_pragmas(conn: &Connection) -> Result<PragmaState> {
    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    Ok(PragmaState {
        journal_mode,
        foreign_keys_enabled: foreign_keys == 1,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
