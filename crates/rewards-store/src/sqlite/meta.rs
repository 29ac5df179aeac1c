//! The single-row version metadata table.
//!
//! `meta_version` holds the schema version the file is at and the oldest
//! version that can still read it. It is created on first open and only ever
//! rewritten by a successful migration or a fresh initialization.

use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;

/// Name of the metadata table; excluded when deciding whether a file is fresh.
pub const META_TABLE: &str = "meta_version";

/// Persisted `(version, compatible_version)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchemaVersion {
    /// Version the schema is at.
    pub version: i64,
    /// Oldest version able to read this schema.
    pub compatible_version: i64,
}

/// Create the metadata table if it does not exist.
pub fn ensure_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta_version (
           version            INTEGER NOT NULL,
           compatible_version INTEGER NOT NULL
         );",
    )?;
    Ok(())
}

/// Read the persisted versions, if a row exists.
pub fn read(conn: &Connection) -> Result<Option<SchemaVersion>> {
    let row = conn
        .query_row(
            "SELECT version, compatible_version FROM meta_version LIMIT 1",
            [],
            |row| {
                Ok(SchemaVersion {
                    version: row.get(0)?,
                    compatible_version: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Replace the persisted versions.
pub fn write(conn: &Connection, versions: SchemaVersion) -> Result<()> {
    let _ = conn.execute("DELETE FROM meta_version", [])?;
    let _ = conn.execute(
        "INSERT INTO meta_version (version, compatible_version) VALUES (?1, ?2)",
        params![versions.version, versions.compatible_version],
    )?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
