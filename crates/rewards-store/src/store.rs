//! The ledger store: lifecycle, transaction runner, and pressure handling.
//!
//! [`LedgerStore`] exclusively owns one `SQLite` connection, opened lazily on
//! the first transaction. Each call to [`LedgerStore::run_transaction`] runs
//! its whole batch inside at most one native transaction and answers with a
//! [`CommandResponse`]; errors never cross this boundary as anything richer
//! than a [`Status`](crate::Status).

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, error, info, warn};

use crate::command::{CommandKind, CommandResponse, CommandResult, Status, Transaction};
use crate::dispatch::{self, Batch, BatchOutcome, Session};
use crate::errors::{Result, StoreError};
use crate::migrations::MigrationSet;
use crate::pressure::{MemoryPressureLevel, MemoryPressureMonitor, PressureRegistration};
use crate::sqlite::{self, SchemaVersion, StoreConfig};

type ConnectionSlot = Arc<Mutex<Option<Connection>>>;

/// Where the store is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleState {
    /// No `Initialize` has succeeded yet.
    Uninitialized,
    /// An `Initialize` has succeeded on the open connection.
    Initialized,
    /// An explicit `Close` ran; the next transaction re-opens.
    Closed,
}

/// Single-connection transactional store.
pub struct LedgerStore {
    config: StoreConfig,
    migrations: MigrationSet,
    conn: ConnectionSlot,
    state: LifecycleState,
    session: Session,
    last_init: Option<SchemaVersion>,
    monitor: Option<MemoryPressureMonitor>,
    registration: Option<PressureRegistration>,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore")
            .field("location", &self.config.location)
            .field("state", &self.state)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl LedgerStore {
    /// Store using the ledger's built-in migrations. Nothing is opened yet.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_migrations(config, MigrationSet::ledger())
    }

    /// Store using a caller-supplied migration set.
    pub fn with_migrations(config: StoreConfig, migrations: MigrationSet) -> Self {
        Self {
            config,
            migrations,
            conn: Arc::new(Mutex::new(None)),
            state: LifecycleState::Uninitialized,
            session: Session::default(),
            last_init: None,
            monitor: None,
            registration: None,
        }
    }

    /// Listen to `monitor` once the store is first initialized.
    #[must_use]
    pub fn with_pressure_monitor(mut self, monitor: MemoryPressureMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether a connection is currently open.
    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Whether the open connection has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.state == LifecycleState::Initialized
    }

    /// Highest version the configured migrations can produce.
    pub fn latest_version(&self) -> u32 {
        self.migrations.latest_version()
    }

    /// Run one transaction and report its outcome.
    pub fn run_transaction(&mut self, transaction: &Transaction) -> CommandResponse {
        match self.execute(transaction) {
            Ok(result) => CommandResponse::ok(result),
            Err(e) => {
                let status = e.status();
                match status {
                    Status::ResponseError => warn!(error = %e, "transaction rejected"),
                    _ => error!(error = %e, ?status, "transaction failed"),
                }
                CommandResponse::failed(status)
            }
        }
    }

    /// Close the connection. The next transaction re-opens it.
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.lock().take() {
            if let Err((_, e)) = conn.close() {
                warn!(error = %e, "connection did not close cleanly");
            }
            info!("store connection closed");
        }
        if self.state != LifecycleState::Uninitialized || self.last_init.is_some() {
            self.state = LifecycleState::Closed;
        }
        self.session = Session::default();
    }

    fn execute(&mut self, transaction: &Transaction) -> Result<Option<CommandResult>> {
        validate(transaction)?;
        if transaction.is_close() {
            self.close();
            return Ok(None);
        }

        let slot = Arc::clone(&self.conn);
        let mut guard = slot.lock();
        if guard.is_none() {
            *guard = Some(self.reopen()?);
        }
        let Some(conn) = guard.as_ref() else {
            return Err(StoreError::Open("connection unavailable".into()));
        };

        let target = SchemaVersion {
            version: transaction.schema_version,
            compatible_version: transaction.compatible_version,
        };

        // Foreign key enforcement cannot change inside a transaction, and
        // table rebuilds must not rewrite references held by other tables.
        let migrating = self.config.foreign_keys
            && transaction
                .commands
                .iter()
                .any(|c| c.kind == CommandKind::Migrate);
        if migrating {
            conn.execute_batch("PRAGMA foreign_keys = OFF;")
                .map_err(|e| StoreError::Transaction(format!("disable foreign keys: {e}")))?;
        }

        let outcome = self.run_batch(conn, transaction, target);

        if migrating {
            if let Err(e) = conn.execute_batch("PRAGMA foreign_keys = ON;") {
                warn!(error = %e, "failed to restore foreign key enforcement");
            }
        }

        let outcome = outcome?;
        if outcome.vacuum {
            vacuum(conn);
        }
        drop(guard);

        self.session = outcome.session;
        if outcome.initialized {
            self.state = LifecycleState::Initialized;
            self.last_init = Some(target);
            self.ensure_pressure_listener();
        }
        Ok(outcome.result)
    }

    fn run_batch(
        &self,
        conn: &Connection,
        transaction: &Transaction,
        target: SchemaVersion,
    ) -> Result<BatchOutcome> {
        let native = conn
            .unchecked_transaction()
            .map_err(|e| StoreError::Transaction(format!("begin: {e}")))?;

        let dispatched = {
            let mut batch = Batch::new(&native, &self.migrations, self.session, target);
            transaction
                .commands
                .iter()
                .enumerate()
                .try_for_each(|(index, command)| {
                    batch.dispatch(command).inspect_err(|_| {
                        debug!(index, kind = ?command.kind, "command failed, rolling back");
                    })
                })
                .map(|()| batch.finish())
        };

        match dispatched {
            Ok(outcome) => {
                native
                    .commit()
                    .map_err(|e| StoreError::Transaction(format!("commit: {e}")))?;
                debug!(commands = transaction.commands.len(), "transaction committed");
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = native.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Open a new connection, restoring the session after an explicit close.
    fn reopen(&mut self) -> Result<Connection> {
        let conn = sqlite::open(&self.config)?;
        self.session = Session::default();

        if self.state == LifecycleState::Closed {
            if let Some(target) = self.last_init {
                let _ = dispatch::initialize(&conn, target, &mut self.session)?;
                self.state = LifecycleState::Initialized;
                debug!(version = target.version, "re-initialized after close");
            }
        }
        Ok(conn)
    }

    fn ensure_pressure_listener(&mut self) {
        if self.registration.is_some() {
            return;
        }
        let Some(monitor) = &self.monitor else {
            return;
        };
        let slot = Arc::downgrade(&self.conn);
        self.registration = Some(monitor.add_listener(move |level| release_memory(&slot, level)));
        debug!("memory pressure listener registered");
    }
}

fn validate(transaction: &Transaction) -> Result<()> {
    if transaction.commands.is_empty() {
        return Err(StoreError::InvalidTransaction("no commands".into()));
    }
    let closes = transaction
        .commands
        .iter()
        .filter(|c| c.kind == CommandKind::Close)
        .count();
    if closes > 0 && transaction.commands.len() > 1 {
        return Err(StoreError::InvalidTransaction(
            "close must be the only command in its transaction".into(),
        ));
    }
    Ok(())
}

/// Reclaim free pages. Runs after commit; failures are only logged.
fn vacuum(conn: &Connection) {
    match conn.execute_batch("VACUUM;") {
        Ok(()) => info!("vacuum complete"),
        Err(e) => warn!(error = %e, "vacuum failed"),
    }
}

fn release_memory(slot: &Weak<Mutex<Option<Connection>>>, level: MemoryPressureLevel) {
    let Some(slot) = slot.upgrade() else {
        return;
    };
    // A transaction in flight holds the lock; skip rather than block the host.
    let Some(guard) = slot.try_lock() else {
        debug!(?level, "store busy, skipping memory release");
        return;
    };
    if let Some(conn) = guard.as_ref() {
        match conn.execute_batch("PRAGMA shrink_memory;") {
            Ok(()) => debug!(?level, "released cached pages"),
            Err(e) => warn!(error = %e, "shrink_memory failed"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
