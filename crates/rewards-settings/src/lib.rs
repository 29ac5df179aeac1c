//! # rewards-settings
//!
//! Layered configuration for the rewards ledger store.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RewardsSettings::default()`]
//! 2. **User file**: `~/.rewards/settings.json`, deep-merged over the defaults
//! 3. **Environment variables**: `REWARDS_*` overrides

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::{DEFAULT_SCHEMA_VERSION, LoggingSettings, RewardsSettings, StoreSettings};
