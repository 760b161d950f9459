//! CLI command implementations.

pub mod inspect;
pub mod reset;

use driftdb_core::CoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// No database file at the given path.
    #[error("no database found at {0}")]
    NotFound(PathBuf),

    /// The database could not be read.
    #[error("database error: {0}")]
    Database(#[from] CoreError),

    /// JSON output failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The file is still open or could not be moved.
    #[error("client reset refused for {0}; close every handle on it and retry")]
    ResetRefused(PathBuf),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;
