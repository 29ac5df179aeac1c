//! Versioned schema migration engine.
//!
//! Each schema version maps to exactly one [`Migration`]. Migrating from the
//! persisted version `A` to a requested version `C` applies every migration in
//! `A+1..=C` in increasing order, so one jump is indistinguishable from a
//! sequence of single steps.
//!
//! Migrations do not open their own transaction: they run on the connection
//! inside the enclosing batch, and a failure anywhere rolls the whole batch
//! back, including any half-finished table rebuild.

pub mod ledger;
pub mod steps;

use std::fmt;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::errors::{Result, StoreError};

/// What a migration does when applied.
pub enum MigrationStep {
    /// Execute a SQL script.
    Sql(String),
    /// Run a function over the open connection.
    Apply(fn(&Connection) -> Result<()>),
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql(sql) => f.debug_tuple("Sql").field(&sql.len()).finish(),
            Self::Apply(_) => f.write_str("Apply(..)"),
        }
    }
}

/// A single migration with a version number and the step that applies it.
#[derive(Debug)]
pub struct Migration {
    /// Version this migration brings the schema to.
    pub version: u32,
    /// Short human description, used in logs.
    pub description: &'static str,
    /// The work to perform.
    pub step: MigrationStep,
}

impl Migration {
    /// Migration defined by a SQL script.
    pub fn sql(version: u32, description: &'static str, sql: impl Into<String>) -> Self {
        Self {
            version,
            description,
            step: MigrationStep::Sql(sql.into()),
        }
    }

    /// Migration defined by a function.
    pub fn apply(
        version: u32,
        description: &'static str,
        apply: fn(&Connection) -> Result<()>,
    ) -> Self {
        Self {
            version,
            description,
            step: MigrationStep::Apply(apply),
        }
    }

    fn run(&self, conn: &Connection) -> Result<()> {
        match &self.step {
            MigrationStep::Sql(sql) => conn
                .execute_batch(sql)
                .map_err(|e| StoreError::migration(self.version, e.to_string())),
            MigrationStep::Apply(apply) => apply(conn).map_err(|e| match e {
                e @ StoreError::Migration { .. } => e,
                other => StoreError::migration(self.version, other.to_string()),
            }),
        }
    }
}

/// An ordered registry of migrations, one per version.
#[derive(Debug, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The ledger's built-in migrations.
    pub fn ledger() -> Self {
        ledger::migrations()
    }

    /// Add a migration. Versions must be registered in strictly increasing order.
    pub fn register(&mut self, migration: Migration) -> Result<()> {
        if migration.version == 0 {
            return Err(StoreError::migration(0, "version 0 is reserved for an empty schema"));
        }
        if let Some(last) = self.migrations.last() {
            if migration.version <= last.version {
                return Err(StoreError::migration(
                    migration.version,
                    format!("registered after v{}", last.version),
                ));
            }
        }
        self.migrations.push(migration);
        Ok(())
    }

    /// Builder-style [`MigrationSet::register`].
    pub fn with(mut self, migration: Migration) -> Result<Self> {
        self.register(migration)?;
        Ok(self)
    }

    /// Highest registered version, or 0 if none.
    pub fn latest_version(&self) -> u32 {
        self.migrations.last().map_or(0, |m| m.version)
    }

    /// Look up the migration for `version`.
    pub fn get(&self, version: u32) -> Option<&Migration> {
        self.migrations
            .binary_search_by_key(&version, |m| m.version)
            .ok()
            .map(|idx| &self.migrations[idx])
    }

    /// Apply every migration in `from+1..=to`, in order. Returns how many ran.
    ///
    /// A version in the range without a registered migration fails before
    /// anything is applied.
    pub fn migrate(&self, conn: &Connection, from: i64, to: i64) -> Result<u32> {
        let from = u32::try_from(from.max(0)).unwrap_or(u32::MAX);
        let to = u32::try_from(to.max(0)).unwrap_or(u32::MAX);

        if to <= from {
            debug!(from, to, "schema already at or beyond target, nothing to migrate");
            return Ok(0);
        }

        let plan = (from + 1..=to)
            .map(|version| self.get(version).ok_or(StoreError::MissingMigration(version)))
            .collect::<Result<Vec<_>>>()?;

        // Rebuilds rename tables aside. References held by other tables must
        // keep naming the original table, which requires foreign key
        // enforcement to be off as well (see `LedgerStore`).
        conn.execute_batch("PRAGMA legacy_alter_table = ON;")
            .map_err(|e| StoreError::migration(from + 1, e.to_string()))?;

        info!(from, to, steps = plan.len(), "migrating schema");
        for migration in &plan {
            info!(
                version = migration.version,
                description = migration.description,
                "applying migration"
            );
            migration.run(conn)?;
        }

        report_foreign_key_violations(conn);
        Ok(plan.len() as u32)
    }
}

/// Legacy rows may reference parents that no longer exist; surface them without failing.
fn report_foreign_key_violations(conn: &Connection) {
    match count_foreign_key_violations(conn) {
        Ok(0) => {}
        Ok(violations) => warn!(violations, "foreign key violations after migration"),
        Err(e) => debug!(error = %e, "foreign_key_check unavailable"),
    }
}

fn count_foreign_key_violations(conn: &Connection) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check")?;
    let mut rows = stmt.query([])?;
    let mut violations = 0;
    while rows.next()?.is_some() {
        violations += 1;
    }
    Ok(violations)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
