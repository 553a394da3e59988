//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why the bridge could not come up with usable settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The settings file is not JSON.
    #[error("{} is not valid JSON: {source}", path.display())]
    Syntax {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser error with line and column.
        source: serde_json::Error,
    },
    /// The merged settings do not fit the settings schema, e.g. a port given
    /// as a string.
    #[error("settings do not match the expected shape: {0}")]
    Shape(#[from] serde_json::Error),
    /// A value parsed but cannot work at runtime.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
