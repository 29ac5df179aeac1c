//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RewardsSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `REWARDS_*` environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::{RewardsSettings, home_dir};

/// Resolve the path to the settings file (`~/.rewards/settings.json`).
pub fn settings_path() -> PathBuf {
    home_dir().join(".rewards").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RewardsSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields the defaults; a file that is not valid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RewardsSettings> {
    let mut settings = read_layered(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn read_layered(path: &Path) -> Result<RewardsSettings> {
    let defaults = serde_json::to_value(RewardsSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `REWARDS_*` environment variables to loaded settings.
///
/// Invalid values are ignored with a warning and the file/default value stays.
pub fn apply_env_overrides(settings: &mut RewardsSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` instead of the process environment.
pub fn apply_overrides(settings: &mut RewardsSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = Env { lookup };

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = env.string("REWARDS_DB_PATH") {
        settings.store.path = v;
    }
    if let Some(v) = env.u32_in("REWARDS_BUSY_TIMEOUT_MS", 100, 600_000) {
        settings.store.busy_timeout_ms = v;
    }
    if let Some(v) = env.bool("REWARDS_FOREIGN_KEYS") {
        settings.store.foreign_keys = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("REWARDS_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("REWARDS_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u32` within an inclusive range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u32_in(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        let val = (self.lookup)(name)?;
        let result = parse_u32_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
