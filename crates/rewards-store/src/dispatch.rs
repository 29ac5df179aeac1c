//! Per-command execution inside one open native transaction.
//!
//! A [`Batch`] works on a copy of the connection's [`Session`]; the store only
//! adopts the updated session once the transaction commits, so a rolled-back
//! `Initialize` or `Migrate` leaves no trace.

use rusqlite::{Connection, params_from_iter};
use tracing::{debug, info};

use crate::command::{Command, CommandKind, CommandResult};
use crate::errors::{Result, StoreError};
use crate::migrations::MigrationSet;
use crate::sqlite::{SchemaVersion, meta, schema};
use crate::value::{Record, Value, check_bindings, decode_row};

/// What the store knows about the open connection between transactions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Session {
    /// An `Initialize` has succeeded on this connection.
    pub initialized: bool,
    /// `Initialize` found an empty file: it reported version 0 and the next
    /// `Migrate` starts from scratch.
    pub fresh: bool,
}

/// Everything a finished batch hands back to the store.
#[derive(Debug)]
pub(crate) struct BatchOutcome {
    pub session: Session,
    pub result: Option<CommandResult>,
    pub vacuum: bool,
    pub initialized: bool,
}

/// Executes the commands of one transaction in order.
pub(crate) struct Batch<'a> {
    conn: &'a Connection,
    migrations: &'a MigrationSet,
    target: SchemaVersion,
    session: Session,
    result: Option<CommandResult>,
    vacuum: bool,
    initialized: bool,
}

impl<'a> Batch<'a> {
    pub fn new(
        conn: &'a Connection,
        migrations: &'a MigrationSet,
        session: Session,
        target: SchemaVersion,
    ) -> Self {
        Self {
            conn,
            migrations,
            target,
            session,
            result: None,
            vacuum: false,
            initialized: false,
        }
    }

    /// Execute one command.
    pub fn dispatch(&mut self, command: &Command) -> Result<()> {
        debug!(kind = ?command.kind, "dispatching command");
        if command.kind != CommandKind::Initialize && !self.session.initialized {
            return Err(StoreError::NotInitialized);
        }

        match command.kind {
            CommandKind::Initialize => {
                let version = initialize(self.conn, self.target, &mut self.session)?;
                self.initialized = true;
                self.result = Some(CommandResult::Value(Value::Int64(version)));
            }
            CommandKind::Read => {
                let records = self.read(command)?;
                self.result = Some(CommandResult::Records(records));
            }
            CommandKind::Execute => self.conn.execute_batch(&command.text)?,
            CommandKind::Run => {
                let mut stmt = self.conn.prepare(&command.text)?;
                let changed = stmt.execute(params_from_iter(command.bindings.iter()))?;
                debug!(changed, "run complete");
            }
            CommandKind::Migrate => self.migrate()?,
            CommandKind::Vacuum => self.vacuum = true,
            CommandKind::Close => {
                return Err(StoreError::InvalidTransaction(
                    "close must be the only command in its transaction".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn finish(self) -> BatchOutcome {
        BatchOutcome {
            session: self.session,
            result: self.result,
            vacuum: self.vacuum,
            initialized: self.initialized,
        }
    }

    fn read(&self, command: &Command) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(&command.text)?;
        check_bindings(&command.record_bindings, stmt.column_count())?;

        let mut rows = stmt.query(params_from_iter(command.bindings.iter()))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(decode_row(row, &command.record_bindings)?);
        }
        debug!(records = records.len(), "read complete");
        Ok(records)
    }

    fn migrate(&mut self) -> Result<()> {
        let from = if self.session.fresh {
            0
        } else {
            meta::read(self.conn)?.map_or(0, |v| v.version)
        };
        let to = self.target.version;

        let applied = self.migrations.migrate(self.conn, from, to)?;
        if applied > 0 || self.session.fresh {
            meta::write(
                self.conn,
                SchemaVersion {
                    version: to.max(from),
                    compatible_version: self.target.compatible_version,
                },
            )?;
        }
        self.session.fresh = false;
        info!(from, to, applied, "schema migrated");
        Ok(())
    }
}

/// Open the version metadata and return the version to report.
///
/// A file with neither a metadata row nor domain tables is fresh: the row is
/// written from `target` and 0 is reported. Otherwise the persisted version is
/// reported, provided this caller can still read it.
pub(crate) fn initialize(
    conn: &Connection,
    target: SchemaVersion,
    session: &mut Session,
) -> Result<i64> {
    if session.initialized && session.fresh {
        return Ok(0);
    }

    meta::ensure_table(conn)?;
    let version = match meta::read(conn)? {
        Some(persisted) => {
            if persisted.compatible_version > target.version {
                return Err(StoreError::TooNew {
                    compatible: persisted.compatible_version,
                    supported: target.version,
                });
            }
            session.fresh = false;
            persisted.version
        }
        None if schema::has_domain_tables(conn)? => return Err(StoreError::MissingMetadata),
        None => {
            meta::write(conn, target)?;
            session.fresh = true;
            info!(
                version = target.version,
                compatible_version = target.compatible_version,
                "initialized fresh store"
            );
            0
        }
    };

    session.initialized = true;
    Ok(version)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
