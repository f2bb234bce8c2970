//! Error types for the instance registry.

use thiserror::Error;

/// Result type alias for registry operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    /// The write would break a registry invariant (e.g. deleting an
    /// instance that still owns bindings).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}
