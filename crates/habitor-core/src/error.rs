//! Error types for habitor-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using habitor-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in habitor-core operations
///
/// Everything here is a local failure and is reported to the caller. Remote
/// failures on the write path never become an `Error`; they turn into queued
/// retries instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote store error surfaced by an operation that cannot degrade to the queue
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
