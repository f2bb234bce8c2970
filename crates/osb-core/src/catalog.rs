//! The service catalog: loaded once, read-only afterwards.
//!
//! Plans are indexed by ID (plan IDs are globally unique per the OSB API).
//! Each plan's `updates_to` list is the edge set of the plan update graph.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::model::{CatalogResponse, Plan, Service};

/// Errors raised while loading or validating a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate service id: {0}")]
    DuplicateService(String),

    #[error("duplicate plan id: {0}")]
    DuplicatePlan(String),

    #[error("plan {plan} updates to unknown plan {target}")]
    UnknownUpdateTarget { plan: String, target: String },
}

/// How a plan treats a named instance parameter on update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterAccess {
    /// Declared by the plan's update schema.
    Updatable,
    /// Declared only by the plan's create schema.
    CreateOnly,
    /// Not declared by the plan at all.
    Unknown,
}

/// Immutable, validated service catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    response: CatalogResponse,
    /// service id → index into `response.services`.
    services: HashMap<String, usize>,
    /// plan id → (service index, plan index).
    plans: HashMap<String, (usize, usize)>,
}

impl Catalog {
    /// Build and validate a catalog.
    pub fn new(response: CatalogResponse) -> Result<Self, CatalogError> {
        let mut services = HashMap::new();
        let mut plans = HashMap::new();

        for (si, service) in response.services.iter().enumerate() {
            if services.insert(service.id.clone(), si).is_some() {
                return Err(CatalogError::DuplicateService(service.id.clone()));
            }
            for (pi, plan) in service.plans.iter().enumerate() {
                if plans.insert(plan.id.clone(), (si, pi)).is_some() {
                    return Err(CatalogError::DuplicatePlan(plan.id.clone()));
                }
            }
        }

        // Update edges must stay within the owning service.
        for service in &response.services {
            for plan in &service.plans {
                for target in &plan.updates_to {
                    if !service.plans.iter().any(|p| &p.id == target) {
                        return Err(CatalogError::UnknownUpdateTarget {
                            plan: plan.id.clone(),
                            target: target.clone(),
                        });
                    }
                }
            }
        }

        Ok(Self {
            response,
            services,
            plans,
        })
    }

    /// Load a catalog from a JSON `CatalogResponse` file.
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        let response: CatalogResponse = serde_json::from_str(&content)?;
        Self::new(response)
    }

    /// The catalog as served to platforms.
    pub fn response(&self) -> &CatalogResponse {
        &self.response
    }

    pub fn service(&self, service_id: &str) -> Option<&Service> {
        self.services
            .get(service_id)
            .map(|&si| &self.response.services[si])
    }

    /// Look up a plan and its owning service.
    pub fn plan(&self, plan_id: &str) -> Option<(&Service, &Plan)> {
        self.plans.get(plan_id).map(|&(si, pi)| {
            let service = &self.response.services[si];
            (service, &service.plans[pi])
        })
    }

    /// Whether the update graph has an edge `from → to`.
    pub fn can_update(&self, from: &str, to: &str) -> bool {
        self.plan(from)
            .is_some_and(|(_, plan)| plan.updates_to.iter().any(|target| target == to))
    }

    /// Classify an instance parameter against a plan's schemas.
    pub fn parameter_access(&self, plan_id: &str, name: &str) -> ParameterAccess {
        let Some((_, plan)) = self.plan(plan_id) else {
            return ParameterAccess::Unknown;
        };
        let schemas = &plan.schemas.service_instance;
        if schemas.update.declares(name) {
            ParameterAccess::Updatable
        } else if schemas.create.declares(name) {
            ParameterAccess::CreateOnly
        } else {
            ParameterAccess::Unknown
        }
    }

    /// Whether bindings may be created for this plan.
    pub fn is_bindable(&self, plan_id: &str) -> bool {
        self.plan(plan_id)
            .is_some_and(|(service, plan)| plan.bindable.unwrap_or(service.bindable))
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn plan_count(&self) -> usize {
        self.plans.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn test_catalog() -> CatalogResponse {
        serde_json::from_value(json!({
            "services": [{
                "name": "postgres",
                "id": "svc-pg",
                "description": "PostgreSQL",
                "bindable": true,
                "plan_updateable": true,
                "plans": [
                    {
                        "id": "pg-small",
                        "name": "small",
                        "description": "1 vCPU",
                        "updates_to": ["pg-large"],
                        "schemas": {
                            "service_instance": {
                                "create": { "parameters": { "properties": {
                                    "storage_gb": { "type": "integer" },
                                    "version": { "type": "string" }
                                }}},
                                "update": { "parameters": { "properties": {
                                    "storage_gb": { "type": "integer" }
                                }}}
                            }
                        }
                    },
                    { "id": "pg-large", "name": "large", "description": "4 vCPU" },
                    { "id": "pg-readonly", "name": "ro", "description": "replica", "bindable": false }
                ]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn lookups_resolve_services_and_plans() {
        let catalog = Catalog::new(test_catalog()).unwrap();
        assert_eq!(catalog.service_count(), 1);
        assert_eq!(catalog.plan_count(), 3);
        assert!(catalog.service("svc-pg").is_some());
        assert!(catalog.service("svc-mysql").is_none());

        let (service, plan) = catalog.plan("pg-large").unwrap();
        assert_eq!(service.id, "svc-pg");
        assert_eq!(plan.name, "large");
    }

    #[test]
    fn update_graph_is_directed() {
        let catalog = Catalog::new(test_catalog()).unwrap();
        assert!(catalog.can_update("pg-small", "pg-large"));
        assert!(!catalog.can_update("pg-large", "pg-small"));
        assert!(!catalog.can_update("pg-missing", "pg-large"));
    }

    #[test]
    fn parameter_access_follows_schemas() {
        let catalog = Catalog::new(test_catalog()).unwrap();
        assert_eq!(
            catalog.parameter_access("pg-small", "storage_gb"),
            ParameterAccess::Updatable
        );
        assert_eq!(
            catalog.parameter_access("pg-small", "version"),
            ParameterAccess::CreateOnly
        );
        assert_eq!(
            catalog.parameter_access("pg-small", "replicas"),
            ParameterAccess::Unknown
        );
        assert_eq!(
            catalog.parameter_access("pg-large", "storage_gb"),
            ParameterAccess::Unknown
        );
    }

    #[test]
    fn plan_bindable_overrides_service() {
        let catalog = Catalog::new(test_catalog()).unwrap();
        assert!(catalog.is_bindable("pg-small"));
        assert!(!catalog.is_bindable("pg-readonly"));
        assert!(!catalog.is_bindable("pg-missing"));
    }

    #[test]
    fn duplicate_plan_ids_are_rejected() {
        let mut response = test_catalog();
        let dup = response.services[0].plans[0].clone();
        response.services[0].plans.push(dup);
        assert!(matches!(
            Catalog::new(response),
            Err(CatalogError::DuplicatePlan(id)) if id == "pg-small"
        ));
    }

    #[test]
    fn duplicate_service_ids_are_rejected() {
        let mut response = test_catalog();
        let mut dup = response.services[0].clone();
        dup.plans.clear();
        response.services.push(dup);
        assert!(matches!(
            Catalog::new(response),
            Err(CatalogError::DuplicateService(id)) if id == "svc-pg"
        ));
    }

    #[test]
    fn dangling_update_edges_are_rejected() {
        let mut response = test_catalog();
        response.services[0].plans[1]
            .updates_to
            .push("pg-huge".to_string());
        assert!(matches!(
            Catalog::new(response),
            Err(CatalogError::UnknownUpdateTarget { plan, target })
                if plan == "pg-large" && target == "pg-huge"
        ));
    }

    #[test]
    fn loads_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, serde_json::to_string(&test_catalog()).unwrap()).unwrap();

        let catalog = Catalog::from_file(&path).unwrap();
        assert_eq!(catalog.response().services[0].name, "postgres");
    }
}
