//! # rewards-db
//!
//! Administrative CLI for the rewards ledger store. Every subcommand is a
//! single [`Transaction`] sent through a [`TransactionQueue`], exactly as an
//! embedding host would issue it.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rewards_settings::{RewardsSettings, StoreSettings};
use rewards_store::{
    Command, CommandResponse, LedgerStore, StoreConfig, Transaction, TransactionQueue, Value,
    ValueKind,
};
use tracing::{debug, info};

/// Rewards ledger store administration.
#[derive(Parser, Debug)]
#[command(name = "rewards-db", about = "Rewards ledger store administration")]
struct Cli {
    /// Settings file (default: `~/.rewards/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database file (overrides settings).
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Create or upgrade the store to the configured version; prints the version found.
    Init,
    /// Migrate the schema.
    Migrate {
        /// Target version (default: the configured schema version).
        #[arg(long)]
        to: Option<i64>,
        /// Vacuum after the migration commits.
        #[arg(long)]
        vacuum: bool,
    },
    /// Print the persisted and newest known schema versions.
    Version,
    /// Run a SELECT and print its rows as JSON.
    Query {
        /// SQL text.
        sql: String,
        /// Comma-separated column kinds (`string,int,int64,double,bool`).
        #[arg(long, value_delimiter = ',', value_parser = parse_kind, required = true)]
        columns: Vec<ValueKind>,
        /// Positional parameter as a JSON scalar; repeat for each `?`.
        #[arg(long = "bind", value_parser = parse_binding)]
        bindings: Vec<Value>,
    },
    /// Run one or more statements.
    Exec {
        /// SQL text.
        sql: String,
        /// Positional parameter as a JSON scalar; turns the script into a single statement.
        #[arg(long = "bind", value_parser = parse_binding)]
        bindings: Vec<Value>,
    },
    /// Compact the database file.
    Vacuum,
}

fn parse_kind(s: &str) -> std::result::Result<ValueKind, String> {
    s.parse()
}

fn parse_binding(s: &str) -> std::result::Result<Value, String> {
    match serde_json::from_str::<serde_json::Value>(s) {
        Ok(serde_json::Value::Null) => Ok(Value::Null),
        Ok(serde_json::Value::Bool(b)) => Ok(Value::Bool(b)),
        Ok(serde_json::Value::Number(n)) => n
            .as_i64()
            .map(Value::Int64)
            .or_else(|| n.as_f64().map(Value::Double))
            .ok_or_else(|| format!("unsupported number: {n}")),
        Ok(serde_json::Value::String(text)) => Ok(Value::String(text)),
        Ok(other) => Err(format!("bindings must be scalars, got {other}")),
        // Bare words are taken as text so `--bind pub_a` works unquoted.
        Err(_) => Ok(Value::String(s.to_string())),
    }
}

fn init_logging(settings: &RewardsSettings) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr; stdout carries command output only.
    let _ = if settings.logging.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()
    };
}

/// Whether the subcommand may create a new database file.
fn creates_store(action: &Action) -> bool {
    matches!(action, Action::Init | Action::Migrate { .. })
}

fn load_settings(cli: &Cli) -> Result<RewardsSettings> {
    let mut settings = match &cli.config {
        Some(path) => rewards_settings::load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => rewards_settings::load_settings().context("failed to load settings")?,
    };
    if let Some(db) = &cli.db {
        settings.store.path = db.to_string_lossy().into_owned();
    }
    Ok(settings)
}

fn store_config(store: &StoreSettings) -> StoreConfig {
    StoreConfig {
        busy_timeout_ms: store.busy_timeout_ms,
        cache_size_kib: store.cache_size_kib,
        journal_mode: store.journal_mode.clone(),
        foreign_keys: store.foreign_keys,
        ..StoreConfig::file(store.resolved_path())
    }
}

/// The transaction a subcommand issues.
fn transaction_for(action: &Action, store: &StoreSettings) -> Transaction {
    let schema_version = match action {
        Action::Migrate { to: Some(to), .. } => *to,
        _ => store.schema_version,
    };
    let tx = Transaction::new(schema_version, store.compatible_version).with(Command::initialize());

    match action {
        Action::Version => tx,
        Action::Init => tx.with(Command::migrate()),
        Action::Migrate { vacuum, .. } => {
            let tx = tx.with(Command::migrate());
            if *vacuum || store.vacuum_after_migrate {
                tx.with(Command::vacuum())
            } else {
                tx
            }
        }
        Action::Query {
            sql,
            columns,
            bindings,
        } => tx.with(Command::read(sql.as_str(), bindings.clone(), columns.clone())),
        Action::Exec { sql, bindings } if bindings.is_empty() => {
            tx.with(Command::execute(sql.as_str()))
        }
        Action::Exec { sql, bindings } => tx.with(Command::run(sql.as_str(), bindings.clone())),
        Action::Vacuum => tx.with(Command::vacuum()),
    }
}

/// What a successful response prints.
fn render(action: &Action, response: &CommandResponse, latest: u32) -> serde_json::Value {
    match action {
        Action::Query { .. } => serde_json::json!(response.records()),
        Action::Version => serde_json::json!({
            "version": response.value(),
            "latest": latest,
        }),
        Action::Init | Action::Migrate { .. } => serde_json::json!({
            "version": response.value(),
        }),
        Action::Exec { .. } | Action::Vacuum => serde_json::json!({
            "status": response.status,
        }),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    init_logging(&settings);

    let path = settings.store.resolved_path();
    if !creates_store(&cli.command) && !path.exists() {
        bail!(
            "no database at {}; run `rewards-db init` first",
            path.display()
        );
    }

    let config = store_config(&settings.store);
    info!(path = %path.display(), "opening rewards store");

    let store = LedgerStore::new(config);
    let latest = store.latest_version();

    let queue = TransactionQueue::spawn(store).context("failed to start store worker")?;
    let transaction = transaction_for(&cli.command, &settings.store);
    debug!(commands = transaction.commands.len(), "sending transaction");
    let response = queue.run(transaction).await?;

    let close = Transaction::new(settings.store.schema_version, settings.store.compatible_version)
        .with(Command::close());
    let _ = queue.run(close).await?;

    if !response.status.is_ok() {
        eprintln!("rewards-db: {:?}", response.status);
        return Ok(ExitCode::FAILURE);
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&render(&cli.command, &response, latest))?
    );
    Ok(ExitCode::SUCCESS)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use rewards_store::{CommandKind, CommandResult, Record, Status};

    use super::*;

    fn kinds(tx: &Transaction) -> Vec<CommandKind> {
        tx.commands.iter().map(|c| c.kind).collect()
    }

    #[test]
    fn cli_parses_query() {
        let cli = Cli::try_parse_from([
            "rewards-db",
            "--db",
            "/tmp/ledger.db",
            "query",
            "SELECT publisher_id, visits FROM activity_info WHERE visits > ?",
            "--columns",
            "string,int64",
            "--bind",
            "3",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/ledger.db")));
        let Action::Query {
            columns, bindings, ..
        } = cli.command
        else {
            panic!("expected query");
        };
        assert_eq!(columns, vec![ValueKind::String, ValueKind::Int64]);
        assert_eq!(bindings, vec![Value::Int64(3)]);
    }

    #[test]
    fn cli_rejects_unknown_kind() {
        let result = Cli::try_parse_from(["rewards-db", "query", "SELECT 1", "--columns", "blob"]);
        assert!(result.is_err());
    }

    #[test]
    fn bindings_parse_as_json_scalars() {
        assert_eq!(parse_binding("null").unwrap(), Value::Null);
        assert_eq!(parse_binding("true").unwrap(), Value::Bool(true));
        assert_eq!(parse_binding("-7").unwrap(), Value::Int64(-7));
        assert_eq!(parse_binding("0.25").unwrap(), Value::Double(0.25));
        assert_eq!(parse_binding("\"42\"").unwrap(), Value::String("42".into()));
        assert_eq!(parse_binding("pub_a").unwrap(), Value::String("pub_a".into()));
        assert!(parse_binding("[1, 2]").is_err());
    }

    #[test]
    fn init_migrates_to_configured_version() {
        let store = StoreSettings::default();
        let tx = transaction_for(&Action::Init, &store);
        assert_eq!(tx.schema_version, rewards_settings::DEFAULT_SCHEMA_VERSION);
        assert_eq!(kinds(&tx), vec![CommandKind::Initialize, CommandKind::Migrate]);
        assert!(creates_store(&Action::Init));
        assert!(!creates_store(&Action::Version));
    }

    #[test]
    fn migrate_targets_requested_version() {
        let store = StoreSettings::default();
        let tx = transaction_for(
            &Action::Migrate {
                to: Some(7),
                vacuum: false,
            },
            &store,
        );
        assert_eq!(tx.schema_version, 7);
        assert_eq!(tx.compatible_version, 1);
        assert_eq!(kinds(&tx), vec![CommandKind::Initialize, CommandKind::Migrate]);
    }

    #[test]
    fn migrate_vacuums_when_configured() {
        let store = StoreSettings {
            vacuum_after_migrate: true,
            ..StoreSettings::default()
        };
        let tx = transaction_for(&Action::Migrate { to: None, vacuum: false }, &store);
        assert_eq!(tx.schema_version, store.schema_version);
        assert_eq!(
            kinds(&tx),
            vec![CommandKind::Initialize, CommandKind::Migrate, CommandKind::Vacuum]
        );
    }

    #[test]
    fn exec_with_bindings_runs_one_statement() {
        let store = StoreSettings::default();
        let script = transaction_for(
            &Action::Exec {
                sql: "DELETE FROM promotion".into(),
                bindings: vec![],
            },
            &store,
        );
        assert_eq!(kinds(&script), vec![CommandKind::Initialize, CommandKind::Execute]);

        let statement = transaction_for(
            &Action::Exec {
                sql: "DELETE FROM promotion WHERE id = ?".into(),
                bindings: vec![Value::from("p1")],
            },
            &store,
        );
        assert_eq!(kinds(&statement), vec![CommandKind::Initialize, CommandKind::Run]);
        assert_eq!(statement.commands[1].bindings, vec![Value::from("p1")]);
    }

    #[test]
    fn store_config_follows_settings() {
        let store = StoreSettings {
            path: "/data/ledger.db".into(),
            busy_timeout_ms: 250,
            foreign_keys: false,
            ..StoreSettings::default()
        };
        let config = store_config(&store);
        assert_eq!(
            config.location,
            rewards_store::StoreLocation::File(PathBuf::from("/data/ledger.db"))
        );
        assert_eq!(config.busy_timeout_ms, 250);
        assert!(!config.foreign_keys);
        assert_eq!(config.journal_mode, "WAL");
    }

    #[test]
    fn default_schema_version_is_the_newest_migration() {
        let latest = LedgerStore::new(StoreConfig::memory()).latest_version();
        assert_eq!(rewards_settings::DEFAULT_SCHEMA_VERSION, i64::from(latest));
    }

    #[test]
    fn query_renders_rows() {
        let response = CommandResponse::ok(Some(CommandResult::Records(vec![Record::from(vec![
            Value::from("pub_a"),
            Value::Int64(3),
        ])])));
        let action = Action::Query {
            sql: String::new(),
            columns: vec![],
            bindings: vec![],
        };
        assert_eq!(
            render(&action, &response, 14),
            serde_json::json!([["pub_a", 3]])
        );
    }

    #[test]
    fn version_renders_both_versions() {
        let response = CommandResponse::ok(Some(CommandResult::Value(Value::Int64(9))));
        assert_eq!(
            render(&Action::Version, &response, 14),
            serde_json::json!({"version": 9, "latest": 14})
        );
        assert_eq!(response.status, Status::ResponseOk);
    }
}
