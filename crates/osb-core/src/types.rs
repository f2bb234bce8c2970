//! Registry records, lifecycle states, and operation records.
//!
//! These are the persisted shapes behind the broker API. Instances and
//! bindings are owned by the registry; operation records by the tracker.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::*;

// ── Service instance ──────────────────────────────────────────────

/// Lifecycle state of a service instance.
///
/// An absent record is the `ABSENT`/`GONE` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Provisioning,
    Provisioned,
    Updating,
    Deprovisioning,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Provisioning => "provisioning",
            InstanceState::Provisioned => "provisioned",
            InstanceState::Updating => "updating",
            InstanceState::Deprovisioning => "deprovisioning",
        };
        f.write_str(s)
    }
}

/// A provisioned (or provisioning) unit of the backing service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceInstance {
    pub id: Uuid,
    pub service_id: String,
    pub plan_id: String,
    pub context: Context,
    pub parameters: Parameters,
    pub binding_ids: BTreeSet<Uuid>,
    pub state: InstanceState,
    pub dashboard_url: Option<String>,
    /// Unix timestamp (seconds) when the record was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last state change.
    pub updated_at: u64,
}

impl ServiceInstance {
    /// A fresh record in `Provisioning` for a provision request.
    pub fn provisioning(id: Uuid, req: &ProvisionRequest) -> Self {
        let now = epoch_secs();
        Self {
            id,
            service_id: req.service_id.clone(),
            plan_id: req.plan_id.clone(),
            context: req.context.clone(),
            parameters: req.parameters.clone(),
            binding_ids: BTreeSet::new(),
            state: InstanceState::Provisioning,
            dashboard_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a provision request describes exactly this instance.
    pub fn matches(&self, req: &ProvisionRequest) -> bool {
        self.service_id == req.service_id
            && self.plan_id == req.plan_id
            && self.parameters == req.parameters
            && self.context == req.context
    }

    /// Move to `state`, bumping `updated_at`.
    pub fn transition(&mut self, state: InstanceState) {
        self.state = state;
        self.updated_at = epoch_secs();
    }

    pub fn to_response(&self) -> ServiceInstanceResponse {
        ServiceInstanceResponse {
            service_id: self.service_id.clone(),
            plan_id: self.plan_id.clone(),
            dashboard_url: self.dashboard_url.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

// ── Binding ───────────────────────────────────────────────────────

/// Lifecycle state of a binding.
///
/// An absent record is the `ABSENT`/`GONE` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingState {
    Binding,
    Bound,
    Unbinding,
}

impl fmt::Display for BindingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BindingState::Binding => "binding",
            BindingState::Bound => "bound",
            BindingState::Unbinding => "unbinding",
        };
        f.write_str(s)
    }
}

/// Connection details handed out for a binding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BindingCredentials {
    pub credentials: Parameters,
    pub syslog_drain_url: Option<String>,
    pub route_service_url: Option<String>,
    pub volume_mounts: Vec<serde_json::Value>,
}

impl BindingCredentials {
    pub fn to_response(&self) -> BindResponse {
        BindResponse {
            credentials: self.credentials.clone(),
            syslog_drain_url: self.syslog_drain_url.clone(),
            route_service_url: self.route_service_url.clone(),
            volume_mounts: self.volume_mounts.clone(),
            operation: None,
        }
    }
}

/// A binding of an application to a service instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BindInstance {
    pub id: Uuid,
    /// Owning service instance.
    pub instance_id: Uuid,
    pub service_id: String,
    pub plan_id: String,
    pub app_id: Option<Uuid>,
    pub parameters: Parameters,
    pub state: BindingState,
    /// Set once the binding reaches `Bound`.
    pub credentials: Option<BindingCredentials>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl BindInstance {
    /// A fresh record in `Binding` for a bind request.
    pub fn binding(id: Uuid, instance_id: Uuid, req: &BindRequest) -> Self {
        let now = epoch_secs();
        Self {
            id,
            instance_id,
            service_id: req.service_id.clone(),
            plan_id: req.plan_id.clone(),
            app_id: req.app_id(),
            parameters: req.parameters.clone(),
            state: BindingState::Binding,
            credentials: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a bind request describes exactly this binding.
    pub fn matches(&self, instance_id: Uuid, req: &BindRequest) -> bool {
        self.instance_id == instance_id
            && self.service_id == req.service_id
            && self.plan_id == req.plan_id
            && self.app_id == req.app_id()
            && self.parameters == req.parameters
    }

    /// Move to `state`, bumping `updated_at`.
    pub fn transition(&mut self, state: BindingState) {
        self.state = state;
        self.updated_at = epoch_secs();
    }
}

// ── Operations ────────────────────────────────────────────────────

/// Opaque, unguessable operation token handed to polling clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationToken(String);

impl OperationToken {
    /// Generate a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for OperationToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OperationToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for OperationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Provision,
    Deprovision,
    Bind,
    Unbind,
    Update,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Provision => "provision",
            OperationKind::Deprovision => "deprovision",
            OperationKind::Bind => "bind",
            OperationKind::Unbind => "unbind",
            OperationKind::Update => "update",
        };
        f.write_str(s)
    }
}

/// State of an operation, spelled as last-operation responses spell it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    #[serde(rename = "in progress")]
    InProgress,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        self != OperationState::InProgress
    }
}

/// Terminal result reported when an operation completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Succeeded { description: Option<String> },
    Failed { description: String },
}

impl OperationOutcome {
    pub fn succeeded(description: impl Into<String>) -> Self {
        Self::Succeeded {
            description: Some(description.into()),
        }
    }

    pub fn failed(description: impl Into<String>) -> Self {
        Self::Failed {
            description: description.into(),
        }
    }

    pub fn state(&self) -> OperationState {
        match self {
            OperationOutcome::Succeeded { .. } => OperationState::Succeeded,
            OperationOutcome::Failed { .. } => OperationState::Failed,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            OperationOutcome::Succeeded { description } => description.as_deref(),
            OperationOutcome::Failed { description } => Some(description),
        }
    }
}

/// A tracked lifecycle operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationRecord {
    pub token: OperationToken,
    pub instance_id: Uuid,
    /// Set for bind and unbind operations.
    pub binding_id: Option<Uuid>,
    pub kind: OperationKind,
    pub state: OperationState,
    pub description: Option<String>,
    pub started_at: u64,
    pub completed_at: Option<u64>,
}

impl OperationRecord {
    /// Whether `outcome` is what this record already reports.
    pub fn reports(&self, outcome: &OperationOutcome) -> bool {
        self.state == outcome.state() && self.description.as_deref() == outcome.description()
    }

    pub fn to_response(&self) -> LastOperationResponse {
        LastOperationResponse {
            state: self.state,
            description: self.description.clone(),
        }
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
