//! Error types for the convenience layer.

use thiserror::Error;

/// Main error type for database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// The host engine could not open or upgrade the database.
    #[error("failed to open database: {0}")]
    Open(String),

    /// A transaction aborted or errored after being opened.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// An individual operation (get/put/delete/cursor step) failed.
    #[error("request failed: {0}")]
    Request(String),

    /// A caller-supplied filter failed during a scan.
    #[error("predicate failed: {0}")]
    Predicate(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DbError>;
