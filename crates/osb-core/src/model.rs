//! Open Service Broker API request and response shapes.
//!
//! Field names follow the published v2.12 wire format. Optional fields are
//! omitted from serialized output when empty.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::OperationState;

/// Generic string-to-value parameter map.
pub type Parameters = serde_json::Map<String, serde_json::Value>;

/// Platform context a service instance runs in.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Context {
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub namespace: String,
}

impl Context {
    pub fn is_empty(&self) -> bool {
        self.platform.is_empty() && self.namespace.is_empty()
    }
}

// ── Catalog ───────────────────────────────────────────────────────

/// Dashboard SSO client advertised by a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardClient {
    pub id: String,
    pub secret: String,
    pub redirect_uri: String,
}

/// A service offering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub name: String,
    pub id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    pub bindable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Parameters>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_client: Option<DashboardClient>,
    #[serde(default, rename = "plan_updateable")]
    pub plan_updatable: bool,
    pub plans: Vec<Plan>,
}

/// A plan of a service offering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Parameters>,
    #[serde(default)]
    pub free: bool,
    /// Overrides the service-level `bindable` flag when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindable: Option<bool>,
    #[serde(default)]
    pub schemas: Schema,
    /// Plan IDs this plan may be updated to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updates_to: Vec<String>,
}

/// JSON schema wrapper for a set of input parameters.
///
/// `parameters` holds a JSON Schema object; its `properties` keys are the
/// parameter names the broker recognizes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InputParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl InputParameters {
    /// Whether the schema declares a property with this name.
    pub fn declares(&self, name: &str) -> bool {
        self.parameters
            .as_ref()
            .and_then(|schema| schema.get("properties"))
            .and_then(|props| props.as_object())
            .is_some_and(|props| props.contains_key(name))
    }
}

/// Schemas for creating and updating a service instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceInstanceSchema {
    #[serde(default)]
    pub create: InputParameters,
    #[serde(default)]
    pub update: InputParameters,
}

/// Schemas for creating a service binding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceBindingSchema {
    #[serde(default)]
    pub create: InputParameters,
}

/// Plan schemas.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    #[serde(default)]
    pub service_instance: ServiceInstanceSchema,
    #[serde(default)]
    pub service_binding: ServiceBindingSchema,
}

/// Response for the catalog call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogResponse {
    pub services: Vec<Service>,
}

// ── Provision / deprovision ───────────────────────────────────────

/// Request to provision a service instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisionRequest {
    #[serde(default, rename = "organization_guid", skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,
    pub plan_id: String,
    pub service_id: String,
    #[serde(default, rename = "space_guid", skip_serializing_if = "Option::is_none")]
    pub space_id: Option<Uuid>,
    #[serde(default)]
    pub context: Context,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
}

/// Response for a provision.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProvisionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// Request to deprovision a service instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeprovisionRequest {
    pub service_id: String,
    pub plan_id: String,
    /// Unbind every binding of the instance before destroying it.
    #[serde(default)]
    pub cascade_bindings: bool,
}

/// Response for a deprovision.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeprovisionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

// ── Bind / unbind ─────────────────────────────────────────────────

/// Resource the binding is created for.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindResource {
    #[serde(default, rename = "app_guid", skip_serializing_if = "Option::is_none")]
    pub app_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

/// Request to bind to a service instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BindRequest {
    pub service_id: String,
    pub plan_id: String,
    /// Deprecated in favor of `bind_resource.app_guid`.
    #[serde(default, rename = "app_guid", skip_serializing_if = "Option::is_none")]
    pub app_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_resource: Option<BindResource>,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
}

impl BindRequest {
    /// The application this binding is for, preferring `bind_resource`.
    pub fn app_id(&self) -> Option<Uuid> {
        self.bind_resource
            .as_ref()
            .and_then(|resource| resource.app_id)
            .or(self.app_id)
    }
}

/// Response for a bind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BindResponse {
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub credentials: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syslog_drain_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// Request to delete a binding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnbindRequest {
    pub service_id: String,
    pub plan_id: String,
}

/// Response for unbinding.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnbindResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

// ── Update ────────────────────────────────────────────────────────

/// Values of the instance prior to the update, as seen by the platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreviousValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<Uuid>,
}

/// Request to update a service instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UpdateRequest {
    pub service_id: String,
    /// Target plan; absent means "keep the current plan".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_values: Option<PreviousValues>,
    #[serde(default)]
    pub context: Context,
}

/// Response for an update.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

// ── Last operation ────────────────────────────────────────────────

/// Request for the state of an accepted asynchronous operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastOperationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    /// Operation token; absent means "the newest operation of the instance".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

/// Response for a last-operation poll.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastOperationResponse {
    pub state: OperationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ── Lookups and errors ────────────────────────────────────────────

/// Response for a get-instance request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceInstanceResponse {
    pub service_id: String,
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
    #[serde(default, skip_serializing_if = "Parameters::is_empty")]
    pub parameters: Parameters,
}

/// Error body for all broker errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provision_request_uses_wire_names() {
        let req: ProvisionRequest = serde_json::from_value(json!({
            "organization_guid": "6a1b4a02-8a5c-4b8e-9a39-0e2c1d3f4a55",
            "space_guid": "0c7f5e1a-2b3d-4c5e-8f9a-1b2c3d4e5f60",
            "service_id": "svc-postgres",
            "plan_id": "plan-small",
            "context": { "platform": "kubernetes", "namespace": "apps" },
            "parameters": { "storage_gb": 10 }
        }))
        .unwrap();

        assert!(req.organization_id.is_some());
        assert!(req.space_id.is_some());
        assert_eq!(req.context.namespace, "apps");
        assert_eq!(req.parameters["storage_gb"], json!(10));
    }

    #[test]
    fn empty_responses_serialize_to_empty_objects() {
        assert_eq!(serde_json::to_value(ProvisionResponse::default()).unwrap(), json!({}));
        assert_eq!(serde_json::to_value(BindResponse::default()).unwrap(), json!({}));
        assert_eq!(serde_json::to_value(UnbindResponse::default()).unwrap(), json!({}));
    }

    #[test]
    fn last_operation_states_use_osb_strings() {
        let resp = LastOperationResponse {
            state: OperationState::InProgress,
            description: None,
        };
        assert_eq!(serde_json::to_value(&resp).unwrap(), json!({ "state": "in progress" }));

        let resp: LastOperationResponse =
            serde_json::from_value(json!({ "state": "failed", "description": "quota exceeded" }))
                .unwrap();
        assert_eq!(resp.state, OperationState::Failed);
        assert_eq!(resp.description.as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn bind_request_prefers_bind_resource_app_id() {
        let legacy = Uuid::new_v4();
        let current = Uuid::new_v4();
        let mut req = BindRequest {
            service_id: "svc".to_string(),
            plan_id: "plan".to_string(),
            app_id: Some(legacy),
            bind_resource: None,
            parameters: Parameters::new(),
        };
        assert_eq!(req.app_id(), Some(legacy));

        req.bind_resource = Some(BindResource {
            app_id: Some(current),
            route: None,
        });
        assert_eq!(req.app_id(), Some(current));
    }

    #[test]
    fn input_parameters_reads_schema_properties() {
        let input = InputParameters {
            parameters: Some(json!({
                "$schema": "http://json-schema.org/draft-04/schema#",
                "type": "object",
                "properties": { "storage_gb": { "type": "integer" } }
            })),
        };
        assert!(input.declares("storage_gb"));
        assert!(!input.declares("version"));
        assert!(!InputParameters::default().declares("storage_gb"));
    }

    #[test]
    fn plan_updatable_keeps_osb_spelling() {
        let svc: Service = serde_json::from_value(json!({
            "name": "pg",
            "id": "svc-pg",
            "description": "PostgreSQL",
            "bindable": true,
            "plan_updateable": true,
            "plans": []
        }))
        .unwrap();
        assert!(svc.plan_updatable);
        let out = serde_json::to_value(&svc).unwrap();
        assert_eq!(out["plan_updateable"], json!(true));
    }
}
