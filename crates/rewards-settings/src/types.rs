//! Settings type definitions.
//!
//! Field names are camelCase in JSON. Every section is `#[serde(default)]`,
//! so a settings file only needs the keys it changes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Schema version of the newest built-in ledger migration.
pub const DEFAULT_SCHEMA_VERSION: i64 = 14;

/// Root settings type.
///
/// ```json
/// {
///   "store": { "path": "/var/lib/rewards/publisher_info_db", "foreignKeys": false },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RewardsSettings {
    /// Database connection and schema targets.
    pub store: StoreSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

/// Database connection and schema targets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Database file. A leading `~/` expands to the home directory.
    pub path: String,
    /// How long a locked database is retried before failing, in milliseconds.
    pub busy_timeout_ms: u32,
    /// Page cache size in KiB.
    pub cache_size_kib: i64,
    /// `SQLite` journal mode.
    pub journal_mode: String,
    /// Whether foreign keys are enforced.
    pub foreign_keys: bool,
    /// Schema version requested by `Initialize` and targeted by `Migrate`.
    pub schema_version: i64,
    /// Oldest schema version able to read what this build writes.
    pub compatible_version: i64,
    /// Whether the CLI vacuums after a migration.
    pub vacuum_after_migrate: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: "~/.rewards/publisher_info_db".to_string(),
            busy_timeout_ms: 5_000,
            cache_size_kib: 2_048,
            journal_mode: "WAL".to_string(),
            foreign_keys: true,
            schema_version: DEFAULT_SCHEMA_VERSION,
            compatible_version: 1,
            vacuum_after_migrate: false,
        }
    }
}

impl StoreSettings {
    /// The database path with `~/` expanded against `$HOME`.
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

/// Log output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

pub(crate) fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None if path == "~" => home_dir(),
        None => PathBuf::from(path),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = RewardsSettings::default();
        assert_eq!(settings.store.busy_timeout_ms, 5_000);
        assert_eq!(settings.store.cache_size_kib, 2_048);
        assert_eq!(settings.store.journal_mode, "WAL");
        assert!(settings.store.foreign_keys);
        assert_eq!(settings.store.schema_version, DEFAULT_SCHEMA_VERSION);
        assert_eq!(settings.store.compatible_version, 1);
        assert!(!settings.store.vacuum_after_migrate);
        assert_eq!(settings.logging.level, "info");
        assert!(!settings.logging.json);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(RewardsSettings::default()).unwrap();
        assert_eq!(json["store"]["busyTimeoutMs"], 5_000);
        assert_eq!(json["store"]["vacuumAfterMigrate"], false);
        assert_eq!(json["logging"]["json"], false);
        assert!(json["store"].get("busy_timeout_ms").is_none());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: RewardsSettings =
            serde_json::from_str(r#"{"store": {"foreignKeys": false}}"#).unwrap();
        assert!(!settings.store.foreign_keys);
        assert_eq!(settings.store.busy_timeout_ms, 5_000);
        assert_eq!(settings.logging, LoggingSettings::default());
    }

    #[test]
    fn absolute_path_is_kept() {
        let store = StoreSettings {
            path: "/var/lib/rewards/db".to_string(),
            ..StoreSettings::default()
        };
        assert_eq!(store.resolved_path(), PathBuf::from("/var/lib/rewards/db"));
    }

    #[test]
    fn home_prefix_is_expanded() {
        let resolved = StoreSettings::default().resolved_path();
        assert!(resolved.ends_with(".rewards/publisher_info_db"));
        assert!(!resolved.to_string_lossy().contains('~'));
    }
}
