//! The store's boundary contract: commands in, a typed response out.
//!
//! A [`Transaction`] is an ordered batch of [`Command`]s executed as one
//! all-or-nothing unit. The store answers with a [`CommandResponse`] whose
//! [`Status`] is the only failure information callers receive.

use serde::{Deserialize, Serialize};

use crate::value::{Record, Value, ValueKind};

/// What a [`Command`] does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Open the version metadata and report the current table version.
    Initialize,
    /// Run a query and return its rows.
    Read,
    /// Run a statement with no bindings and no rows (DDL, bulk statements).
    Execute,
    /// Run one mutating statement with positional bindings.
    Run,
    /// Migrate the schema to the transaction's `schema_version`.
    Migrate,
    /// Reclaim disk space after the transaction commits.
    Vacuum,
    /// Close the underlying connection. Must be alone in its transaction.
    Close,
}

/// One unit of work against the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// What the command does.
    pub kind: CommandKind,
    /// Statement text for `Read`, `Execute` and `Run`; ignored otherwise.
    #[serde(default)]
    pub text: String,
    /// Positional parameters for `Read` and `Run`.
    #[serde(default)]
    pub bindings: Vec<Value>,
    /// Column kinds for `Read` results, in column order.
    #[serde(default)]
    pub record_bindings: Vec<ValueKind>,
}

impl Command {
    fn control(kind: CommandKind) -> Self {
        Self {
            kind,
            text: String::new(),
            bindings: Vec::new(),
            record_bindings: Vec::new(),
        }
    }

    /// `Initialize` command.
    pub fn initialize() -> Self {
        Self::control(CommandKind::Initialize)
    }

    /// `Migrate` command.
    pub fn migrate() -> Self {
        Self::control(CommandKind::Migrate)
    }

    /// `Vacuum` command.
    pub fn vacuum() -> Self {
        Self::control(CommandKind::Vacuum)
    }

    /// `Close` command.
    pub fn close() -> Self {
        Self::control(CommandKind::Close)
    }

    /// `Execute` command for unbound statement text.
    pub fn execute(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::control(CommandKind::Execute)
        }
    }

    /// `Run` command for a mutating statement with positional bindings.
    pub fn run(text: impl Into<String>, bindings: Vec<Value>) -> Self {
        Self {
            text: text.into(),
            bindings,
            ..Self::control(CommandKind::Run)
        }
    }

    /// `Read` command returning rows decoded with `record_bindings`.
    pub fn read(
        text: impl Into<String>,
        bindings: Vec<Value>,
        record_bindings: Vec<ValueKind>,
    ) -> Self {
        Self {
            kind: CommandKind::Read,
            text: text.into(),
            bindings,
            record_bindings,
        }
    }
}

/// An ordered batch of commands executed atomically.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Commands in execution order.
    pub commands: Vec<Command>,
    /// Schema version the caller expects (target for `Migrate`).
    pub schema_version: i64,
    /// Oldest schema version that can still read what the caller writes.
    pub compatible_version: i64,
}

impl Transaction {
    /// Empty transaction targeting the given versions.
    pub fn new(schema_version: i64, compatible_version: i64) -> Self {
        Self {
            commands: Vec::new(),
            schema_version,
            compatible_version,
        }
    }

    /// Append a command.
    #[must_use]
    pub fn with(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    /// Whether this is the single-`Close` transaction.
    pub fn is_close(&self) -> bool {
        matches!(self.commands.as_slice(), [only] if only.kind == CommandKind::Close)
    }
}

/// Outcome classification returned to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Every command succeeded and the batch committed.
    ResponseOk,
    /// Malformed input (empty batch, `Close` mixed with other commands, bad bindings).
    ResponseError,
    /// The store could not be opened or initialized.
    InitializationError,
    /// The native transaction could not begin or commit.
    TransactionError,
    /// A single command failed; the batch was rolled back.
    CommandError,
}

impl Status {
    /// Whether this is [`Status::ResponseOk`].
    pub fn is_ok(self) -> bool {
        self == Self::ResponseOk
    }
}

/// Data carried back by a successful transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandResult {
    /// Rows produced by a `Read`.
    Records(Vec<Record>),
    /// A scalar, e.g. the table version reported by `Initialize`.
    Value(Value),
}

/// The store's answer to a [`Transaction`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Outcome of the batch.
    pub status: Status,
    /// Result of the last `Read` or `Initialize`, when the batch succeeded.
    pub result: Option<CommandResult>,
}

impl CommandResponse {
    /// Successful response carrying `result`.
    pub fn ok(result: Option<CommandResult>) -> Self {
        Self {
            status: Status::ResponseOk,
            result,
        }
    }

    /// Failed response with no result.
    pub fn failed(status: Status) -> Self {
        Self {
            status,
            result: None,
        }
    }

    /// Records from a `Read`, or an empty slice.
    pub fn records(&self) -> &[Record] {
        match &self.result {
            Some(CommandResult::Records(records)) => records,
            _ => &[],
        }
    }

    /// Scalar result, if any.
    pub fn value(&self) -> Option<&Value> {
        match &self.result {
            Some(CommandResult::Value(value)) => Some(value),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
