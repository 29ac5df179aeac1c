//! Error types for the ledger store.
//!
//! [`StoreError`] is returned by every internal operation. It never crosses
//! the store boundary directly: [`StoreError::status`] folds each variant into
//! the response [`Status`] taxonomy, and the native diagnostic text is only
//! ever logged.

use thiserror::Error;

use crate::command::Status;

/// Errors that can occur while executing commands against the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` error raised while executing a statement.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Filesystem error while preparing the database location.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The database file could not be opened or configured.
    #[error("failed to open database: {0}")]
    Open(String),

    /// A command other than `Initialize` arrived before the store was initialized.
    #[error("store is not initialized")]
    NotInitialized,

    /// The on-disk schema was written by a newer, incompatible version.
    #[error("database too new: compatible version {compatible} exceeds supported {supported}")]
    TooNew {
        /// Persisted compatible version.
        compatible: i64,
        /// Highest version this caller understands.
        supported: i64,
    },

    /// The file contains domain tables but no version metadata row.
    #[error("database has tables but no version metadata")]
    MissingMetadata,

    /// A read produced rows whose width does not match the requested bindings.
    #[error("record binding mismatch: {expected} bindings for {actual} columns")]
    BindingMismatch {
        /// Number of record bindings supplied by the caller.
        expected: usize,
        /// Number of columns returned by the statement.
        actual: usize,
    },

    /// A migration step failed.
    #[error("migration v{version} failed: {message}")]
    Migration {
        /// Version whose migration failed.
        version: u32,
        /// Describes which step failed and why.
        message: String,
    },

    /// The requested range contains a version with no registered migration.
    #[error("no migration registered for version {0}")]
    MissingMigration(u32),

    /// The transaction is malformed (empty, or `Close` batched with other commands).
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// The native transaction could not begin or commit.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// The queue worker owning the store is gone.
    #[error("store queue unavailable: {0}")]
    Queue(String),
}

impl StoreError {
    /// Map this error to the response status reported to callers.
    pub fn status(&self) -> Status {
        match self {
            Self::Open(_)
            | Self::Io(_)
            | Self::NotInitialized
            | Self::TooNew { .. }
            | Self::MissingMetadata
            | Self::Queue(_) => Status::InitializationError,
            Self::BindingMismatch { .. } | Self::InvalidTransaction(_) => Status::ResponseError,
            Self::Transaction(_) => Status::TransactionError,
            Self::Sqlite(_) | Self::Migration { .. } | Self::MissingMigration(_) => Status::CommandError,
        }
    }

    pub(crate) fn migration(version: u32, message: impl Into<String>) -> Self {
        Self::Migration {
            version,
            message: message.into(),
        }
    }
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
