//! Shared fixtures for broker integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Semaphore;
use uuid::Uuid;

use osb_broker::{Broker, OpenServiceBroker, Provisioner, ProvisionerError};
use osb_core::{
    BindInstance, BindRequest, BindingCredentials, Catalog, CatalogResponse, Context,
    LastOperationRequest, LastOperationResponse, OperationState, Parameters, ProvisionRequest,
    ServiceInstance,
};
use osb_state::{
    BindingMutator, InstanceMutator, InstanceRegistry, MemoryRegistry, StateError, StateResult,
};
use osb_tracker::MemoryTracker;

// ── Fake provisioner ────────────────────────────────────────────────

/// Provisioner that counts calls, fails on demand, and can hold every call
/// until the test releases it.
#[derive(Default)]
pub struct FakeProvisioner {
    pub creates: AtomicU64,
    pub destroys: AtomicU64,
    pub binds: AtomicU64,
    pub unbinds: AtomicU64,
    pub reconfigures: AtomicU64,
    failures: Mutex<HashMap<&'static str, ProvisionerError>>,
    panics: Mutex<HashSet<&'static str>>,
    gate: Option<Semaphore>,
}

impl FakeProvisioner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every call waits for a [`release`](Self::release) before returning.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        })
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(calls);
        }
    }

    /// Make every call to `op` fail with `message`.
    pub fn fail(&self, op: &'static str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(op, ProvisionerError::Failed(message.to_string()));
    }

    /// Make every call to `op` panic.
    pub fn panic_on(&self, op: &'static str) {
        self.panics.lock().unwrap().insert(op);
    }

    pub fn count(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }

    async fn call(&self, op: &'static str, counter: &AtomicU64) -> Result<(), ProvisionerError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let panics = self.panics.lock().unwrap().contains(op);
        if panics {
            panic!("{op} blew up");
        }
        match self.failures.lock().unwrap().get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn create(&self, instance: &ServiceInstance) -> Result<Option<String>, ProvisionerError> {
        self.call("create", &self.creates).await?;
        Ok(Some(dashboard_url(instance.id)))
    }

    async fn destroy(&self, _instance: &ServiceInstance) -> Result<(), ProvisionerError> {
        self.call("destroy", &self.destroys).await
    }

    async fn bind(
        &self,
        _instance: &ServiceInstance,
        binding: &BindInstance,
    ) -> Result<BindingCredentials, ProvisionerError> {
        self.call("bind", &self.binds).await?;
        Ok(credentials(binding.id))
    }

    async fn unbind(
        &self,
        _instance: &ServiceInstance,
        _binding: &BindInstance,
    ) -> Result<(), ProvisionerError> {
        self.call("unbind", &self.unbinds).await
    }

    async fn reconfigure(
        &self,
        _current: &ServiceInstance,
        _desired: &ServiceInstance,
    ) -> Result<(), ProvisionerError> {
        self.call("reconfigure", &self.reconfigures).await
    }
}

pub fn dashboard_url(instance_id: Uuid) -> String {
    format!("https://dashboard.example.com/{instance_id}")
}

pub fn credentials(binding_id: Uuid) -> BindingCredentials {
    BindingCredentials {
        credentials: params(json!({ "uri": format!("postgres://{binding_id}@db") })),
        ..BindingCredentials::default()
    }
}

// ── Flaky registry ──────────────────────────────────────────────────

/// Memory registry that can fail instance updates and hide instances.
#[derive(Default)]
pub struct FlakyRegistry {
    inner: MemoryRegistry,
    failing_updates: AtomicUsize,
    hidden: Mutex<HashSet<Uuid>>,
}

impl FlakyRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `count` calls to `update_instance`.
    pub fn fail_instance_updates(&self, count: usize) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }

    /// Report `id` as absent from `get_instance`.
    pub fn hide_instance(&self, id: Uuid) {
        self.hidden.lock().unwrap().insert(id);
    }
}

#[async_trait]
impl InstanceRegistry for FlakyRegistry {
    async fn get_instance(&self, id: Uuid) -> StateResult<ServiceInstance> {
        if self.hidden.lock().unwrap().contains(&id) {
            return Err(StateError::NotFound(format!("instance {id}")));
        }
        self.inner.get_instance(id).await
    }

    async fn put_instance(&self, instance: &ServiceInstance) -> StateResult<()> {
        self.inner.put_instance(instance).await
    }

    async fn update_instance(
        &self,
        id: Uuid,
        mutator: InstanceMutator,
    ) -> StateResult<ServiceInstance> {
        let failing = self
            .failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StateError::Write("disk full".to_string()));
        }
        self.inner.update_instance(id, mutator).await
    }

    async fn delete_instance(&self, id: Uuid) -> StateResult<()> {
        self.inner.delete_instance(id).await
    }

    async fn list_instances(&self) -> StateResult<Vec<ServiceInstance>> {
        self.inner.list_instances().await
    }

    async fn get_binding(&self, id: Uuid) -> StateResult<BindInstance> {
        self.inner.get_binding(id).await
    }

    async fn put_binding(&self, binding: &BindInstance) -> StateResult<()> {
        self.inner.put_binding(binding).await
    }

    async fn update_binding(
        &self,
        id: Uuid,
        mutator: BindingMutator,
    ) -> StateResult<BindInstance> {
        self.inner.update_binding(id, mutator).await
    }

    async fn delete_binding(&self, id: Uuid) -> StateResult<()> {
        self.inner.delete_binding(id).await
    }

    async fn list_bindings(&self, instance_id: Uuid) -> StateResult<Vec<BindInstance>> {
        self.inner.list_bindings(instance_id).await
    }
}

// ── Catalog and requests ────────────────────────────────────────────

pub fn catalog_response() -> CatalogResponse {
    serde_json::from_value(json!({
        "services": [
            {
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
                    {
                        "id": "pg-large",
                        "name": "large",
                        "description": "4 vCPU",
                        "schemas": {
                            "service_instance": {
                                "update": { "parameters": { "properties": {
                                    "storage_gb": { "type": "integer" }
                                }}}
                            }
                        }
                    },
                    {
                        "id": "pg-replica",
                        "name": "replica",
                        "description": "read replica",
                        "bindable": false
                    }
                ]
            },
            {
                "name": "cache",
                "id": "svc-cache",
                "description": "Key-value cache",
                "bindable": true,
                "plans": [
                    { "id": "cache-basic", "name": "basic", "description": "256 MB" }
                ]
            }
        ]
    }))
    .unwrap()
}

pub fn broker(provisioner: Arc<FakeProvisioner>) -> Broker {
    let catalog = Arc::new(Catalog::new(catalog_response()).unwrap());
    Broker::new(
        catalog,
        Arc::new(MemoryRegistry::new()),
        Arc::new(MemoryTracker::default()),
        provisioner,
    )
}

pub fn broker_with(provisioner: Arc<FakeProvisioner>, registry: Arc<FlakyRegistry>) -> Broker {
    let catalog = Arc::new(Catalog::new(catalog_response()).unwrap());
    Broker::new(
        catalog,
        registry,
        Arc::new(MemoryTracker::default()),
        provisioner,
    )
}

pub fn params(value: serde_json::Value) -> Parameters {
    value.as_object().cloned().unwrap_or_default()
}

pub fn context() -> Context {
    Context {
        platform: "kubernetes".to_string(),
        namespace: "apps".to_string(),
    }
}

pub fn provision_request(plan_id: &str) -> ProvisionRequest {
    ProvisionRequest {
        organization_id: None,
        plan_id: plan_id.to_string(),
        service_id: "svc-pg".to_string(),
        space_id: None,
        context: context(),
        parameters: params(json!({ "storage_gb": 10, "version": "16" })),
    }
}

pub fn bind_request() -> BindRequest {
    BindRequest {
        service_id: "svc-pg".to_string(),
        plan_id: "pg-small".to_string(),
        app_id: Some(Uuid::new_v4()),
        bind_resource: None,
        parameters: Parameters::new(),
    }
}

// ── Polling ─────────────────────────────────────────────────────────

pub fn poll(token: Option<&str>) -> LastOperationRequest {
    LastOperationRequest {
        service_id: None,
        plan_id: None,
        operation: token.map(str::to_string),
    }
}

/// Poll until the operation leaves `in progress`.
pub async fn wait_for(
    broker: &Broker,
    instance_id: Uuid,
    token: Option<&str>,
) -> LastOperationResponse {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = broker.last_operation(instance_id, poll(token)).await.unwrap();
        if status.state != OperationState::InProgress {
            return status;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "operation never finished"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
