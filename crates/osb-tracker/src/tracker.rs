//! The `OperationTracker` trait.

use async_trait::async_trait;
use uuid::Uuid;

use osb_core::{OperationKind, OperationOutcome, OperationRecord, OperationToken};

use crate::error::TrackerResult;

/// Owner of all operation records.
///
/// Tokens are unguessable and never reused. Records move from
/// `in progress` to exactly one terminal state and never back.
#[async_trait]
pub trait OperationTracker: Send + Sync + 'static {
    /// Start tracking an operation on `instance_id`.
    ///
    /// Fails with `OperationInProgress` if the instance already has an
    /// unfinished operation of any kind. Finished records for the same
    /// instance are dropped.
    async fn begin(
        &self,
        instance_id: Uuid,
        binding_id: Option<Uuid>,
        kind: OperationKind,
    ) -> TrackerResult<OperationToken>;

    /// Record the terminal outcome of an operation.
    ///
    /// Completing again with the same outcome returns the stored record.
    /// A different outcome fails with `ConflictingOutcome`.
    async fn complete(
        &self,
        token: &OperationToken,
        outcome: OperationOutcome,
    ) -> TrackerResult<OperationRecord>;

    async fn status(&self, token: &OperationToken) -> TrackerResult<OperationRecord>;

    /// The newest record for an instance.
    async fn latest(&self, instance_id: Uuid) -> TrackerResult<OperationRecord>;

    /// Drop finished records older than the retention window. Returns the
    /// number removed.
    async fn reap_expired(&self) -> usize;
}
