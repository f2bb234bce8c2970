//! In-memory registry backend.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use osb_core::{BindInstance, InstanceState, ServiceInstance};

use crate::error::{StateError, StateResult};
use crate::registry::{BindingMutator, InstanceMutator, InstanceRegistry};

#[derive(Default)]
struct Tables {
    instances: HashMap<Uuid, ServiceInstance>,
    bindings: HashMap<Uuid, BindInstance>,
}

/// Registry backed by hash maps behind a single `RwLock`.
///
/// One lock covers both tables so binding bookkeeping on the owning
/// instance happens in the same critical section.
#[derive(Default)]
pub struct MemoryRegistry {
    tables: RwLock<Tables>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InstanceRegistry for MemoryRegistry {
    async fn get_instance(&self, id: Uuid) -> StateResult<ServiceInstance> {
        let tables = self.tables.read().await;
        tables
            .instances
            .get(&id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(format!("instance {id}")))
    }

    async fn put_instance(&self, instance: &ServiceInstance) -> StateResult<()> {
        let mut tables = self.tables.write().await;
        if tables.instances.contains_key(&instance.id) {
            return Err(StateError::Duplicate(format!("instance {}", instance.id)));
        }
        tables.instances.insert(instance.id, instance.clone());
        debug!(instance_id = %instance.id, state = %instance.state, "instance stored");
        Ok(())
    }

    async fn update_instance(
        &self,
        id: Uuid,
        mutator: InstanceMutator,
    ) -> StateResult<ServiceInstance> {
        let mut tables = self.tables.write().await;
        let instance = tables
            .instances
            .get_mut(&id)
            .ok_or_else(|| StateError::NotFound(format!("instance {id}")))?;
        let binding_ids = instance.binding_ids.clone();
        mutator(&mut *instance);
        instance.id = id;
        instance.binding_ids = binding_ids;
        debug!(instance_id = %id, state = %instance.state, "instance updated");
        Ok(instance.clone())
    }

    async fn delete_instance(&self, id: Uuid) -> StateResult<()> {
        let mut tables = self.tables.write().await;
        let instance = tables
            .instances
            .get(&id)
            .ok_or_else(|| StateError::NotFound(format!("instance {id}")))?;
        if !instance.binding_ids.is_empty() {
            return Err(StateError::Conflict(format!(
                "instance {id} still owns {} binding(s)",
                instance.binding_ids.len()
            )));
        }
        tables.instances.remove(&id);
        debug!(instance_id = %id, "instance deleted");
        Ok(())
    }

    async fn list_instances(&self) -> StateResult<Vec<ServiceInstance>> {
        let tables = self.tables.read().await;
        Ok(tables.instances.values().cloned().collect())
    }

    async fn get_binding(&self, id: Uuid) -> StateResult<BindInstance> {
        let tables = self.tables.read().await;
        tables
            .bindings
            .get(&id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(format!("binding {id}")))
    }

    async fn put_binding(&self, binding: &BindInstance) -> StateResult<()> {
        let mut tables = self.tables.write().await;
        if tables.bindings.contains_key(&binding.id) {
            return Err(StateError::Duplicate(format!("binding {}", binding.id)));
        }
        let instance = tables
            .instances
            .get_mut(&binding.instance_id)
            .ok_or_else(|| StateError::NotFound(format!("instance {}", binding.instance_id)))?;
        if instance.state == InstanceState::Deprovisioning {
            return Err(StateError::Conflict(format!(
                "instance {} is deprovisioning",
                binding.instance_id
            )));
        }
        instance.binding_ids.insert(binding.id);
        tables.bindings.insert(binding.id, binding.clone());
        debug!(binding_id = %binding.id, instance_id = %binding.instance_id, "binding stored");
        Ok(())
    }

    async fn update_binding(
        &self,
        id: Uuid,
        mutator: BindingMutator,
    ) -> StateResult<BindInstance> {
        let mut tables = self.tables.write().await;
        let binding = tables
            .bindings
            .get_mut(&id)
            .ok_or_else(|| StateError::NotFound(format!("binding {id}")))?;
        let instance_id = binding.instance_id;
        mutator(&mut *binding);
        binding.id = id;
        binding.instance_id = instance_id;
        Ok(binding.clone())
    }

    async fn delete_binding(&self, id: Uuid) -> StateResult<()> {
        let mut tables = self.tables.write().await;
        let binding = tables
            .bindings
            .remove(&id)
            .ok_or_else(|| StateError::NotFound(format!("binding {id}")))?;
        if let Some(instance) = tables.instances.get_mut(&binding.instance_id) {
            instance.binding_ids.remove(&id);
        }
        debug!(binding_id = %id, instance_id = %binding.instance_id, "binding deleted");
        Ok(())
    }

    async fn list_bindings(&self, instance_id: Uuid) -> StateResult<Vec<BindInstance>> {
        let tables = self.tables.read().await;
        Ok(tables
            .bindings
            .values()
            .filter(|b| b.instance_id == instance_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::conformance;

    #[tokio::test]
    async fn instance_crud() {
        conformance::instance_crud(&MemoryRegistry::new()).await;
    }

    #[tokio::test]
    async fn duplicate_instance_rejected() {
        conformance::duplicate_instance_rejected(&MemoryRegistry::new()).await;
    }

    #[tokio::test]
    async fn update_missing_instance_fails() {
        conformance::update_missing_instance_fails(&MemoryRegistry::new()).await;
    }

    #[tokio::test]
    async fn mutator_cannot_change_identity() {
        conformance::mutator_cannot_change_identity(&MemoryRegistry::new()).await;
    }

    #[tokio::test]
    async fn binding_lifecycle() {
        conformance::binding_lifecycle(&MemoryRegistry::new()).await;
    }

    #[tokio::test]
    async fn binding_requires_live_instance() {
        conformance::binding_requires_live_instance(&MemoryRegistry::new()).await;
    }

    #[tokio::test]
    async fn concurrent_updates_serialize() {
        let registry = std::sync::Arc::new(MemoryRegistry::new());
        let instance = conformance::test_instance();
        registry.put_instance(&instance).await.unwrap();
        let id = instance.id;

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .update_instance(
                        id,
                        Box::new(move |inst| {
                            inst.parameters
                                .insert(format!("k{i}"), serde_json::Value::from(i));
                        }),
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = registry.get_instance(id).await.unwrap();
        // storage_gb plus one key per writer: no lost updates.
        assert_eq!(stored.parameters.len(), 17);
    }
}
