//! The `InstanceRegistry` trait.

use async_trait::async_trait;
use uuid::Uuid;

use osb_core::{BindInstance, ServiceInstance};

use crate::error::StateResult;

/// Read-modify-write closure applied to an instance under the registry's
/// write lock.
pub type InstanceMutator = Box<dyn FnOnce(&mut ServiceInstance) + Send>;

/// Read-modify-write closure applied to a binding under the registry's
/// write lock.
pub type BindingMutator = Box<dyn FnOnce(&mut BindInstance) + Send>;

/// Authoritative store of instance and binding records.
///
/// Every mutating call is linearizable per instance ID. Implementations
/// may be remote; callers treat every method as a suspension point.
///
/// ## Binding bookkeeping
///
/// `put_binding` and `delete_binding` also add/remove the binding ID in the
/// owning instance's `binding_ids`, in the same write. `put_binding` fails
/// with `NotFound` if the owning instance is absent and with `Conflict` if
/// it is deprovisioning. `delete_instance` fails with `Conflict` while the
/// instance still owns bindings.
#[async_trait]
pub trait InstanceRegistry: Send + Sync + 'static {
    /// Get an instance. `NotFound` if absent.
    async fn get_instance(&self, id: Uuid) -> StateResult<ServiceInstance>;

    /// Insert a new instance. `Duplicate` if the ID is already present.
    async fn put_instance(&self, instance: &ServiceInstance) -> StateResult<()>;

    /// Atomically apply `mutator` and return the updated record.
    ///
    /// The mutator must not change the instance ID or its `binding_ids`;
    /// both are restored if it does.
    async fn update_instance(
        &self,
        id: Uuid,
        mutator: InstanceMutator,
    ) -> StateResult<ServiceInstance>;

    /// Delete an instance. `NotFound` if absent.
    async fn delete_instance(&self, id: Uuid) -> StateResult<()>;

    /// List all instances.
    async fn list_instances(&self) -> StateResult<Vec<ServiceInstance>>;

    /// Get a binding. `NotFound` if absent.
    async fn get_binding(&self, id: Uuid) -> StateResult<BindInstance>;

    /// Insert a new binding and record it on its instance.
    async fn put_binding(&self, binding: &BindInstance) -> StateResult<()>;

    /// Atomically apply `mutator` to a binding and return the updated record.
    ///
    /// The binding ID and owning instance are restored if the mutator
    /// changes them.
    async fn update_binding(
        &self,
        id: Uuid,
        mutator: BindingMutator,
    ) -> StateResult<BindInstance>;

    /// Delete a binding and remove it from its instance.
    async fn delete_binding(&self, id: Uuid) -> StateResult<()>;

    /// List the bindings owned by an instance.
    async fn list_bindings(&self, instance_id: Uuid) -> StateResult<Vec<BindInstance>>;
}
