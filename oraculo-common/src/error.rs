//! Common error types for Oraculo

use thiserror::Error;

/// Common result type for Oraculo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of the storage and configuration layers
#[derive(Error, Debug)]
pub enum Error {
    /// Opening the pool or bootstrapping the schema failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Config file unreadable or database directory not creatable
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file missing, unparsable or out of range
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stored value that no longer parses (e.g. a corrupt timestamp)
    #[error("Internal error: {0}")]
    Internal(String),
}
