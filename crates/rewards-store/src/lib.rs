//! # rewards-store
//!
//! Local transactional store for the rewards ledger, backed by `SQLite`.
//!
//! Callers talk to the store only through command batches:
//!
//! - **Commands**: [`Command`] / [`Transaction`] in, [`CommandResponse`] out, with a
//!   closed [`Status`] taxonomy as the only failure signal
//! - **Value codec**: the five-variant [`Value`] union and its pairwise column coercions
//! - **Runner**: [`LedgerStore`] executes each batch in at most one native transaction,
//!   all-or-nothing, with `VACUUM` deferred until after commit
//! - **Migrations**: versioned schema evolution, including the ledger's own history
//!   ([`MigrationSet::ledger`])
//! - **Lifecycle**: lazy open, explicit close with transparent re-open, and cache release
//!   on [`MemoryPressureMonitor`] signals
//! - **Queue**: [`TransactionQueue`] serializes async callers onto one worker thread

#![deny(unsafe_code)]

pub mod command;
mod dispatch;
pub mod errors;
pub mod migrations;
pub mod pressure;
pub mod queue;
pub mod sqlite;
pub mod store;
pub mod value;

pub use command::{Command, CommandKind, CommandResponse, CommandResult, Status, Transaction};
pub use errors::{Result, StoreError};
pub use migrations::{Migration, MigrationSet, MigrationStep};
pub use pressure::{MemoryPressureLevel, MemoryPressureMonitor, PressureRegistration};
pub use queue::TransactionQueue;
pub use sqlite::{SchemaVersion, StoreConfig, StoreLocation};
pub use store::{LedgerStore, LifecycleState};
pub use value::{Record, Value, ValueKind};
