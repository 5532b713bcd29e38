//! Common error types for Kessler

use thiserror::Error;

use crate::field_path::FieldPathError;

/// Common result type for Kessler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the registry engine and its tools
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed dotted field path
    #[error("Invalid field path: {0}")]
    FieldPath(#[from] FieldPathError),

    /// Optimistic write lost the race too many times
    #[error("Revision conflict on '{identifier}' after {attempts} attempts")]
    RevisionConflict { identifier: String, attempts: u32 },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for failures of the storage layer itself (connectivity, locking)
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Io(_))
    }
}
