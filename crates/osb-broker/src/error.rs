//! Broker error taxonomy.
//!
//! Every failure surfaced by the broker maps to exactly one [`ErrorKind`].
//! Outer layers (HTTP routing, CLIs) map kinds to status codes without
//! matching on messages.

use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use osb_core::{ErrorResponse, OperationKind};
use osb_state::StateError;
use osb_tracker::TrackerError;

use crate::provisioner::ProvisionerError;

/// Result type alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("instance {0} is already provisioned with different attributes")]
    AlreadyProvisioned(Uuid),

    #[error("binding exists: {0}")]
    BindingExists(String),

    #[error("provisioning of {0} is in progress")]
    ProvisionInProgress(Uuid),

    #[error("deprovisioning of {0} is in progress")]
    DeprovisionInProgress(Uuid),

    #[error("update of {0} is in progress")]
    UpdateInProgress(Uuid),

    #[error("binding {0} is in progress")]
    BindingInProgress(Uuid),

    #[error("unbinding {0} is in progress")]
    UnbindingInProgress(Uuid),

    #[error("plan not found: {0}")]
    PlanNotFound(String),

    #[error("parameter not found: {0}")]
    ParameterNotFound(String),

    #[error("parameter not updatable: {0}")]
    ParameterNotUpdatable(String),

    #[error("plan {from} cannot be updated to {to}")]
    PlanUpdateNotPossible { from: String, to: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("provisioner failure: {0}")]
    AdapterFailure(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

/// Stable classification of a [`BrokerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Duplicate,
    AlreadyProvisioned,
    BindingExists,
    ProvisionInProgress,
    DeprovisionInProgress,
    UpdateInProgress,
    BindingInProgress,
    UnbindingInProgress,
    PlanNotFound,
    ParameterNotFound,
    ParameterNotUpdatable,
    PlanUpdateNotPossible,
    Forbidden,
    AdapterFailure,
    Cancelled,
    Internal,
}

impl BrokerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::NotFound(_) => ErrorKind::NotFound,
            BrokerError::Duplicate(_) => ErrorKind::Duplicate,
            BrokerError::AlreadyProvisioned(_) => ErrorKind::AlreadyProvisioned,
            BrokerError::BindingExists(_) => ErrorKind::BindingExists,
            BrokerError::ProvisionInProgress(_) => ErrorKind::ProvisionInProgress,
            BrokerError::DeprovisionInProgress(_) => ErrorKind::DeprovisionInProgress,
            BrokerError::UpdateInProgress(_) => ErrorKind::UpdateInProgress,
            BrokerError::BindingInProgress(_) => ErrorKind::BindingInProgress,
            BrokerError::UnbindingInProgress(_) => ErrorKind::UnbindingInProgress,
            BrokerError::PlanNotFound(_) => ErrorKind::PlanNotFound,
            BrokerError::ParameterNotFound(_) => ErrorKind::ParameterNotFound,
            BrokerError::ParameterNotUpdatable(_) => ErrorKind::ParameterNotUpdatable,
            BrokerError::PlanUpdateNotPossible { .. } => ErrorKind::PlanUpdateNotPossible,
            BrokerError::Forbidden(_) => ErrorKind::Forbidden,
            BrokerError::AdapterFailure(_) => ErrorKind::AdapterFailure,
            BrokerError::Cancelled => ErrorKind::Cancelled,
            BrokerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The in-progress error for an active operation of `kind` on `target`.
    pub fn in_progress(kind: OperationKind, target: Uuid) -> Self {
        match kind {
            OperationKind::Provision => BrokerError::ProvisionInProgress(target),
            OperationKind::Deprovision => BrokerError::DeprovisionInProgress(target),
            OperationKind::Update => BrokerError::UpdateInProgress(target),
            OperationKind::Bind => BrokerError::BindingInProgress(target),
            OperationKind::Unbind => BrokerError::UnbindingInProgress(target),
        }
    }

    /// Map a tracker error for an operation on `instance_id`.
    ///
    /// A conflicting bind or unbind names the binding the active operation
    /// works on.
    pub fn from_tracker(err: TrackerError, instance_id: Uuid) -> Self {
        match err {
            TrackerError::OperationInProgress {
                kind, binding_id, ..
            } => Self::in_progress(kind, binding_id.unwrap_or(instance_id)),
            TrackerError::NotFound(what) => BrokerError::NotFound(what),
            other => {
                error!(%instance_id, error = %other, "operation tracker invariant violated");
                BrokerError::Internal(other.to_string())
            }
        }
    }

    /// Text recorded for a failed operation. Provisioner messages are kept
    /// verbatim.
    pub fn description(&self) -> String {
        match self {
            BrokerError::AdapterFailure(msg) | BrokerError::Forbidden(msg) => msg.clone(),
            other => other.to_string(),
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            description: self.description(),
        }
    }
}

impl From<StateError> for BrokerError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => BrokerError::NotFound(what),
            StateError::Duplicate(what) => BrokerError::Duplicate(what),
            other => {
                error!(error = %other, "instance registry failure");
                BrokerError::Internal(other.to_string())
            }
        }
    }
}

impl From<ProvisionerError> for BrokerError {
    fn from(err: ProvisionerError) -> Self {
        match err {
            ProvisionerError::Forbidden(msg) => BrokerError::Forbidden(msg),
            ProvisionerError::Failed(msg) => BrokerError::AdapterFailure(msg),
        }
    }
}

impl From<&BrokerError> for ErrorResponse {
    fn from(err: &BrokerError) -> Self {
        err.to_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osb_core::OperationToken;

    #[test]
    fn tracker_conflicts_map_to_matching_in_progress_kind() {
        let id = Uuid::new_v4();
        let cases = [
            (OperationKind::Provision, ErrorKind::ProvisionInProgress),
            (OperationKind::Deprovision, ErrorKind::DeprovisionInProgress),
            (OperationKind::Update, ErrorKind::UpdateInProgress),
            (OperationKind::Bind, ErrorKind::BindingInProgress),
            (OperationKind::Unbind, ErrorKind::UnbindingInProgress),
        ];
        for (kind, expected) in cases {
            let err = BrokerError::from_tracker(
                TrackerError::OperationInProgress {
                    kind,
                    token: OperationToken::generate(),
                    binding_id: None,
                },
                id,
            );
            assert_eq!(err.kind(), expected);
        }
    }

    #[test]
    fn binding_conflicts_name_the_binding() {
        let instance_id = Uuid::new_v4();
        let binding_id = Uuid::new_v4();
        let err = BrokerError::from_tracker(
            TrackerError::OperationInProgress {
                kind: OperationKind::Unbind,
                token: OperationToken::generate(),
                binding_id: Some(binding_id),
            },
            instance_id,
        );
        assert!(matches!(err, BrokerError::UnbindingInProgress(id) if id == binding_id));
        assert_eq!(err.to_string(), format!("unbinding {binding_id} is in progress"));
    }

    #[test]
    fn registry_backend_failures_are_internal() {
        let err: BrokerError = StateError::Write("disk full".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);

        let err: BrokerError = StateError::NotFound("instance x".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn provisioner_messages_are_verbatim() {
        let err: BrokerError = ProvisionerError::Failed("quota exceeded".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::AdapterFailure);
        assert_eq!(err.to_response().description, "quota exceeded");

        let err: BrokerError = ProvisionerError::Forbidden("org suspended".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.description(), "org suspended");
    }
}
