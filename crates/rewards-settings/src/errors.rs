//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON, or does not fit the settings shape.
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
