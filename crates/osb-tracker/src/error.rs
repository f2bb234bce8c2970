//! Error types for the operation tracker.

use osb_core::{OperationKind, OperationState, OperationToken};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for tracker operations.
pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("operation not found: {0}")]
    NotFound(String),

    /// The instance already has an unfinished operation.
    #[error("{kind} operation {token} is still in progress")]
    OperationInProgress {
        kind: OperationKind,
        token: OperationToken,
        binding_id: Option<Uuid>,
    },

    /// A finished operation was completed again with a different outcome.
    #[error("operation {token} already {recorded:?}, cannot report {reported:?}")]
    ConflictingOutcome {
        token: OperationToken,
        recorded: OperationState,
        reported: OperationState,
    },
}
