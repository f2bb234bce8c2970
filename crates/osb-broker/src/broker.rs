//! Broker: the orchestrator behind [`OpenServiceBroker`].
//!
//! The broker owns no lifecycle state. It coordinates the registry (instance
//! and binding records), the tracker (operation records), and the
//! provisioner, serializing work per instance through [`InstanceLocks`].
//!
//! Every mutating call follows the same shape:
//!
//! ```text
//! lock instance → read registry → reject / answer idempotently
//!   → tracker.begin → registry write (transitional state)
//!   → async: spawn job, release lock, return token
//!   → sync:  spawn job holding the lock, await its completion
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use osb_core::{
    BindRequest, BindResponse, BindingState, Catalog, CatalogResponse, DeprovisionRequest,
    DeprovisionResponse, InstanceState, LastOperationRequest, LastOperationResponse,
    OperationKind, OperationOutcome, OperationToken, ProvisionRequest, ProvisionResponse,
    ServiceInstance, ServiceInstanceResponse, UnbindRequest, UnbindResponse, UpdateRequest,
    UpdateResponse,
};
use osb_state::{InstanceRegistry, StateError};
use osb_tracker::{OperationTracker, TrackerError};

use crate::api::OpenServiceBroker;
use crate::context::RequestContext;
use crate::dispatcher::Dispatcher;
use crate::error::{BrokerError, BrokerResult};
use crate::jobs::{Completion, Job, Work};
use crate::locks::{InstanceGuard, InstanceLocks};
use crate::provisioner::Provisioner;

/// Shared state handed to every job.
pub(crate) struct BrokerCore {
    pub(crate) catalog: Arc<Catalog>,
    pub(crate) registry: Arc<dyn InstanceRegistry>,
    pub(crate) tracker: Arc<dyn OperationTracker>,
    pub(crate) provisioner: Arc<dyn Provisioner>,
    pub(crate) locks: InstanceLocks,
}

/// How a dispatched operation left the caller.
pub(crate) enum Dispatched {
    /// Running in the background; poll with this token.
    Accepted(OperationToken),
    /// Ran to completion while the caller waited.
    Finished(Completion),
}

/// Open Service Broker orchestrator.
#[derive(Clone)]
pub struct Broker {
    pub(crate) core: Arc<BrokerCore>,
    pub(crate) dispatcher: Dispatcher,
}

impl Broker {
    pub fn new(
        catalog: Arc<Catalog>,
        registry: Arc<dyn InstanceRegistry>,
        tracker: Arc<dyn OperationTracker>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self {
            core: Arc::new(BrokerCore {
                catalog,
                registry,
                tracker,
                provisioner,
                locks: InstanceLocks::new(),
            }),
            dispatcher: Dispatcher::default(),
        }
    }

    /// Use `dispatcher` for background work.
    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn catalog_ref(&self) -> &Catalog {
        &self.core.catalog
    }

    pub fn registry(&self) -> &Arc<dyn InstanceRegistry> {
        &self.core.registry
    }

    pub fn tracker(&self) -> &Arc<dyn OperationTracker> {
        &self.core.tracker
    }

    /// Background operations not yet finished.
    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// Wait up to `timeout` for background operations. Returns the number
    /// still running.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        self.dispatcher.shutdown(timeout).await
    }

    /// Settle records left in a transitional state by a previous process.
    ///
    /// Operation records do not survive a restart, so nothing would ever
    /// finish these. Instances still provisioning and bindings still binding
    /// are removed; updating and deprovisioning instances and unbinding
    /// bindings return to their last stable state. Returns the number of
    /// records changed.
    pub async fn recover(&self) -> BrokerResult<usize> {
        let registry = self.core.registry.as_ref();
        let mut changed = 0;

        for instance in registry.list_instances().await? {
            let _guard = self.core.locks.acquire(instance.id).await;
            for binding in registry.list_bindings(instance.id).await? {
                match binding.state {
                    BindingState::Binding => {
                        registry.delete_binding(binding.id).await?;
                        changed += 1;
                    }
                    BindingState::Unbinding => {
                        registry
                            .update_binding(
                                binding.id,
                                Box::new(|b| b.transition(BindingState::Bound)),
                            )
                            .await?;
                        changed += 1;
                    }
                    BindingState::Bound => {}
                }
            }
            match instance.state {
                InstanceState::Provisioning => {
                    registry.delete_instance(instance.id).await?;
                    changed += 1;
                }
                InstanceState::Updating | InstanceState::Deprovisioning => {
                    registry
                        .update_instance(
                            instance.id,
                            Box::new(|i| i.transition(InstanceState::Provisioned)),
                        )
                        .await?;
                    changed += 1;
                }
                InstanceState::Provisioned => {}
            }
        }

        if changed > 0 {
            warn!(changed, "interrupted operations rolled back");
        }
        Ok(changed)
    }

    // ── Shared steps ───────────────────────────────────────────────

    /// Take the instance lock, giving up if the request is cancelled.
    pub(crate) async fn lock(
        &self,
        instance_id: Uuid,
        ctx: &RequestContext,
    ) -> BrokerResult<InstanceGuard> {
        ctx.run(async { Ok(self.core.locks.acquire(instance_id).await) })
            .await
    }

    /// Fetch an instance, `None` if absent.
    pub(crate) async fn find_instance(
        &self,
        instance_id: Uuid,
    ) -> BrokerResult<Option<ServiceInstance>> {
        match self.core.registry.get_instance(instance_id).await {
            Ok(instance) => Ok(Some(instance)),
            Err(StateError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Start tracking an operation.
    pub(crate) async fn begin(
        &self,
        instance_id: Uuid,
        binding_id: Option<Uuid>,
        kind: OperationKind,
    ) -> BrokerResult<OperationToken> {
        self.core
            .tracker
            .begin(instance_id, binding_id, kind)
            .await
            .map_err(|e| BrokerError::from_tracker(e, instance_id))
    }

    /// Fail an operation that never reached the provisioner.
    pub(crate) async fn abandon(&self, token: &OperationToken, err: &BrokerError) {
        let outcome = OperationOutcome::failed(err.description());
        if let Err(e) = self.core.tracker.complete(token, outcome).await {
            error!(operation = %token, error = %e, "failed to record abandoned operation");
        }
    }

    /// Hand `work` to the dispatcher.
    ///
    /// With `accepts_incomplete` the lock is released once the job is
    /// spawned. Otherwise the job keeps the lock and the caller waits for
    /// it; a cancelled wait leaves the job running.
    pub(crate) async fn dispatch(
        &self,
        token: OperationToken,
        work: Work,
        guard: InstanceGuard,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<Dispatched> {
        let instance_id = work.instance_id();
        let kind = work.kind();
        let job = Job::new(self.core.clone(), token.clone(), work);

        if accepts_incomplete {
            self.dispatcher.spawn(job.execute());
            drop(guard);
            info!(%instance_id, operation = %token, %kind, "operation accepted");
            return Ok(Dispatched::Accepted(token));
        }

        let handle = self.dispatcher.spawn(job.holding(guard).execute());
        let completion = ctx
            .run(async {
                handle.await.map_err(|e| {
                    error!(%instance_id, operation = %token, error = %e, "operation task failed");
                    BrokerError::Internal(format!("operation task failed: {e}"))
                })?
            })
            .await?;
        Ok(Dispatched::Finished(completion))
    }
}

/// Error for a job that finished with the wrong kind of result.
pub(crate) fn unexpected(completion: Completion) -> BrokerError {
    error!(?completion, "operation finished with an unexpected result");
    BrokerError::Internal(format!("unexpected completion {completion:?}"))
}

#[async_trait]
impl OpenServiceBroker for Broker {
    async fn catalog(&self) -> BrokerResult<CatalogResponse> {
        Ok(self.core.catalog.response().clone())
    }

    async fn provision(
        &self,
        instance_id: Uuid,
        req: ProvisionRequest,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<ProvisionResponse> {
        self.provision_instance(instance_id, req, accepts_incomplete, ctx)
            .await
    }

    async fn deprovision(
        &self,
        instance_id: Uuid,
        req: DeprovisionRequest,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<DeprovisionResponse> {
        self.deprovision_instance(instance_id, req, accepts_incomplete, ctx)
            .await
    }

    async fn bind(
        &self,
        instance_id: Uuid,
        binding_id: Uuid,
        req: BindRequest,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<BindResponse> {
        self.create_binding(instance_id, binding_id, req, accepts_incomplete, ctx)
            .await
    }

    async fn unbind(
        &self,
        instance_id: Uuid,
        binding_id: Uuid,
        req: UnbindRequest,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<UnbindResponse> {
        self.remove_binding(instance_id, binding_id, req, accepts_incomplete, ctx)
            .await
    }

    async fn update(
        &self,
        instance_id: Uuid,
        req: UpdateRequest,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<UpdateResponse> {
        self.update_instance(instance_id, req, accepts_incomplete, ctx)
            .await
    }

    async fn last_operation(
        &self,
        instance_id: Uuid,
        req: LastOperationRequest,
    ) -> BrokerResult<LastOperationResponse> {
        let result = match req.operation {
            Some(token) => self.core.tracker.status(&OperationToken::from(token)).await,
            None => self.core.tracker.latest(instance_id).await,
        };
        let record = result.map_err(|e| match e {
            TrackerError::NotFound(what) => BrokerError::NotFound(what),
            other => BrokerError::from_tracker(other, instance_id),
        })?;
        if record.instance_id != instance_id {
            return Err(BrokerError::NotFound(format!(
                "operation {} for instance {instance_id}",
                record.token
            )));
        }
        debug!(%instance_id, operation = %record.token, state = ?record.state, "last operation polled");
        Ok(record.to_response())
    }

    async fn get_service_instance(
        &self,
        instance_id: Uuid,
    ) -> BrokerResult<ServiceInstanceResponse> {
        let instance = self.core.registry.get_instance(instance_id).await?;
        match instance.state {
            InstanceState::Provisioning => Err(BrokerError::ProvisionInProgress(instance_id)),
            InstanceState::Updating => Err(BrokerError::UpdateInProgress(instance_id)),
            InstanceState::Provisioned | InstanceState::Deprovisioning => {
                Ok(instance.to_response())
            }
        }
    }

    async fn get_bind_instance(&self, binding_id: Uuid) -> BrokerResult<BindResponse> {
        let binding = self.core.registry.get_binding(binding_id).await?;
        self.owner_of(&binding).await?;
        match (binding.state, binding.credentials) {
            (BindingState::Binding, _) => Err(BrokerError::BindingInProgress(binding_id)),
            (BindingState::Unbinding, _) => Err(BrokerError::UnbindingInProgress(binding_id)),
            (BindingState::Bound, Some(credentials)) => Ok(credentials.to_response()),
            (BindingState::Bound, None) => Ok(BindResponse::default()),
        }
    }
}
