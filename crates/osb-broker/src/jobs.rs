//! Operation jobs: one provisioner call plus the registry and tracker
//! writes that finish it.
//!
//! A job runs the provisioner without holding the instance lock, then
//! takes the lock to record the result. The registry is always finalized
//! before the tracker reports the terminal state, so a poller that sees
//! `succeeded` or `failed` also sees the final registry records.
//!
//! A provisioner call that panics counts as a failed call. If recording the
//! result in the registry fails, the records touched by the operation are
//! returned to their last stable state before the operation is reported
//! `failed`.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use osb_core::{
    BindInstance, BindingCredentials, BindingState, InstanceState, OperationKind,
    OperationOutcome, OperationToken, ServiceInstance,
};
use osb_state::StateError;

use crate::broker::BrokerCore;
use crate::error::{BrokerResult, ErrorKind};
use crate::locks::InstanceGuard;
use crate::provisioner::{Provisioner, ProvisionerError};

/// Provisioner work for one accepted operation.
#[derive(Debug, Clone)]
pub(crate) enum Work {
    Provision {
        instance: ServiceInstance,
    },
    /// `bindings` are unbound first when the caller asked for a cascade.
    Deprovision {
        instance: ServiceInstance,
        bindings: Vec<BindInstance>,
    },
    Update {
        current: ServiceInstance,
        desired: ServiceInstance,
    },
    Bind {
        instance: ServiceInstance,
        binding: BindInstance,
    },
    Unbind {
        instance: ServiceInstance,
        binding: BindInstance,
    },
}

/// Successful result of a job.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Completion {
    Provisioned { dashboard_url: Option<String> },
    Deprovisioned,
    Updated,
    Bound(BindingCredentials),
    Unbound,
}

impl Completion {
    fn description(&self) -> &'static str {
        match self {
            Completion::Provisioned { .. } => "service instance provisioned",
            Completion::Deprovisioned => "service instance deprovisioned",
            Completion::Updated => "service instance updated",
            Completion::Bound(_) => "service binding created",
            Completion::Unbound => "service binding deleted",
        }
    }
}

/// What the provisioner did, carrying what finalization needs.
enum Performed {
    Provision {
        instance_id: Uuid,
        result: Result<Option<String>, ProvisionerError>,
    },
    Deprovision {
        instance_id: Uuid,
        unbound: Vec<Uuid>,
        remaining: Vec<Uuid>,
        result: Result<(), ProvisionerError>,
    },
    Update {
        desired: ServiceInstance,
        result: Result<(), ProvisionerError>,
    },
    Bind {
        binding_id: Uuid,
        result: Result<BindingCredentials, ProvisionerError>,
    },
    Unbind {
        binding_id: Uuid,
        result: Result<(), ProvisionerError>,
    },
}

impl Work {
    pub(crate) fn instance_id(&self) -> Uuid {
        match self {
            Work::Provision { instance }
            | Work::Deprovision { instance, .. }
            | Work::Bind { instance, .. }
            | Work::Unbind { instance, .. } => instance.id,
            Work::Update { current, .. } => current.id,
        }
    }

    pub(crate) fn binding_id(&self) -> Option<Uuid> {
        match self {
            Work::Bind { binding, .. } | Work::Unbind { binding, .. } => Some(binding.id),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> OperationKind {
        match self {
            Work::Provision { .. } => OperationKind::Provision,
            Work::Deprovision { .. } => OperationKind::Deprovision,
            Work::Update { .. } => OperationKind::Update,
            Work::Bind { .. } => OperationKind::Bind,
            Work::Unbind { .. } => OperationKind::Unbind,
        }
    }

    /// The result of this work when the provisioner call never returned.
    fn failed(self, err: ProvisionerError) -> Performed {
        match self {
            Work::Provision { instance } => Performed::Provision {
                instance_id: instance.id,
                result: Err(err),
            },
            Work::Deprovision { instance, bindings } => Performed::Deprovision {
                instance_id: instance.id,
                unbound: Vec::new(),
                remaining: bindings.iter().map(|b| b.id).collect(),
                result: Err(err),
            },
            Work::Update { desired, .. } => Performed::Update {
                desired,
                result: Err(err),
            },
            Work::Bind { binding, .. } => Performed::Bind {
                binding_id: binding.id,
                result: Err(err),
            },
            Work::Unbind { binding, .. } => Performed::Unbind {
                binding_id: binding.id,
                result: Err(err),
            },
        }
    }

    async fn perform(self, provisioner: &dyn Provisioner) -> Performed {
        match self {
            Work::Provision { instance } => Performed::Provision {
                instance_id: instance.id,
                result: provisioner.create(&instance).await,
            },
            Work::Deprovision { instance, bindings } => {
                let mut unbound = Vec::with_capacity(bindings.len());
                let mut remaining: Vec<Uuid> = bindings.iter().map(|b| b.id).collect();
                for binding in &bindings {
                    if let Err(e) = provisioner.unbind(&instance, binding).await {
                        return Performed::Deprovision {
                            instance_id: instance.id,
                            unbound,
                            remaining,
                            result: Err(e),
                        };
                    }
                    unbound.push(binding.id);
                    remaining.retain(|id| *id != binding.id);
                }
                Performed::Deprovision {
                    instance_id: instance.id,
                    result: provisioner.destroy(&instance).await,
                    unbound,
                    remaining,
                }
            }
            Work::Update { current, desired } => Performed::Update {
                result: provisioner.reconfigure(&current, &desired).await,
                desired,
            },
            Work::Bind { instance, binding } => Performed::Bind {
                binding_id: binding.id,
                result: provisioner.bind(&instance, &binding).await,
            },
            Work::Unbind { instance, binding } => Performed::Unbind {
                binding_id: binding.id,
                result: provisioner.unbind(&instance, &binding).await,
            },
        }
    }
}

/// An accepted operation ready to run on the dispatcher.
pub(crate) struct Job {
    core: Arc<BrokerCore>,
    token: OperationToken,
    work: Work,
    /// Lock carried over from a synchronous caller.
    guard: Option<InstanceGuard>,
}

impl Job {
    pub(crate) fn new(core: Arc<BrokerCore>, token: OperationToken, work: Work) -> Self {
        Self {
            core,
            token,
            work,
            guard: None,
        }
    }

    /// Keep holding `guard` for the whole job.
    pub(crate) fn holding(mut self, guard: InstanceGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    pub(crate) async fn execute(self) -> BrokerResult<Completion> {
        let Job {
            core,
            token,
            work,
            guard,
        } = self;
        let instance_id = work.instance_id();
        let binding_id = work.binding_id();
        let kind = work.kind();

        let performed = perform_isolated(&core, work, &token).await;

        let guard = match guard {
            Some(guard) => guard,
            None => core.locks.acquire(instance_id).await,
        };
        let finished = finalize(&core, performed).await;
        if let Err(e) = &finished {
            // Provisioner failures are already settled by `finalize`.
            if !matches!(e.kind(), ErrorKind::AdapterFailure | ErrorKind::Forbidden) {
                restore(&core, instance_id, binding_id, kind).await;
            }
        }

        let outcome = match &finished {
            Ok(completion) => OperationOutcome::succeeded(completion.description()),
            Err(e) => OperationOutcome::failed(e.description()),
        };
        if let Err(e) = core.tracker.complete(&token, outcome).await {
            error!(%instance_id, operation = %token, error = %e, "failed to record operation outcome");
        }

        match &finished {
            Ok(_) => info!(
                %instance_id,
                binding_id = ?binding_id,
                operation = %token,
                %kind,
                "operation succeeded"
            ),
            Err(e) => warn!(
                %instance_id,
                binding_id = ?binding_id,
                operation = %token,
                %kind,
                error = %e,
                "operation failed"
            ),
        }
        let gone = matches!(
            (kind, &finished),
            (OperationKind::Deprovision, Ok(_)) | (OperationKind::Provision, Err(_))
        );
        drop(guard);
        if gone {
            core.locks.prune().await;
        }
        finished
    }
}

/// Run the provisioner on its own task so a panic fails only this call.
async fn perform_isolated(
    core: &Arc<BrokerCore>,
    work: Work,
    token: &OperationToken,
) -> Performed {
    let fallback = work.clone();
    let provisioner = core.provisioner.clone();
    match tokio::spawn(async move { work.perform(provisioner.as_ref()).await }).await {
        Ok(performed) => performed,
        Err(e) => {
            error!(
                instance_id = %fallback.instance_id(),
                operation = %token,
                error = %e,
                "provisioner call did not complete"
            );
            fallback.failed(ProvisionerError::Failed(format!(
                "provisioner call did not complete: {e}"
            )))
        }
    }
}

/// Best-effort return of the operation's records to their last stable
/// state after finalization failed part way.
async fn restore(
    core: &BrokerCore,
    instance_id: Uuid,
    binding_id: Option<Uuid>,
    kind: OperationKind,
) {
    let registry = core.registry.as_ref();
    let result = match (kind, binding_id) {
        (OperationKind::Provision, _) => registry.delete_instance(instance_id).await,
        (OperationKind::Update, _) => registry
            .update_instance(
                instance_id,
                Box::new(|i| i.transition(InstanceState::Provisioned)),
            )
            .await
            .map(drop),
        (OperationKind::Deprovision, _) => restore_deprovision(core, instance_id).await,
        (OperationKind::Bind, Some(binding_id)) => registry.delete_binding(binding_id).await,
        (OperationKind::Unbind, Some(binding_id)) => registry
            .update_binding(binding_id, Box::new(|b| b.transition(BindingState::Bound)))
            .await
            .map(drop),
        (OperationKind::Bind | OperationKind::Unbind, None) => Ok(()),
    };
    match result {
        Ok(()) => warn!(
            %instance_id,
            binding_id = ?binding_id,
            %kind,
            "records restored after failed finalization"
        ),
        // Finalization already got as far as removing the record.
        Err(StateError::NotFound(_)) => {}
        Err(e) => error!(
            %instance_id,
            binding_id = ?binding_id,
            %kind,
            error = %e,
            "could not restore records after failed finalization"
        ),
    }
}

async fn restore_deprovision(core: &BrokerCore, instance_id: Uuid) -> Result<(), StateError> {
    let registry = core.registry.as_ref();
    for binding in registry.list_bindings(instance_id).await? {
        if binding.state == BindingState::Unbinding {
            registry
                .update_binding(binding.id, Box::new(|b| b.transition(BindingState::Bound)))
                .await?;
        }
    }
    registry
        .update_instance(
            instance_id,
            Box::new(|i| i.transition(InstanceState::Provisioned)),
        )
        .await
        .map(drop)
}

/// Record a provisioner result in the registry.
async fn finalize(core: &BrokerCore, performed: Performed) -> BrokerResult<Completion> {
    let registry = core.registry.as_ref();
    match performed {
        Performed::Provision {
            instance_id,
            result: Ok(dashboard_url),
        } => {
            let url = dashboard_url.clone();
            registry
                .update_instance(
                    instance_id,
                    Box::new(move |i| {
                        i.dashboard_url = url;
                        i.transition(InstanceState::Provisioned);
                    }),
                )
                .await?;
            Ok(Completion::Provisioned { dashboard_url })
        }
        Performed::Provision {
            instance_id,
            result: Err(e),
        } => {
            registry.delete_instance(instance_id).await?;
            Err(e.into())
        }

        Performed::Deprovision {
            instance_id,
            unbound,
            remaining,
            result,
        } => {
            for binding_id in unbound {
                registry.delete_binding(binding_id).await?;
            }
            match result {
                Ok(()) => {
                    registry.delete_instance(instance_id).await?;
                    Ok(Completion::Deprovisioned)
                }
                Err(e) => {
                    for binding_id in remaining {
                        registry
                            .update_binding(
                                binding_id,
                                Box::new(|b| b.transition(BindingState::Bound)),
                            )
                            .await?;
                    }
                    registry
                        .update_instance(
                            instance_id,
                            Box::new(|i| i.transition(InstanceState::Provisioned)),
                        )
                        .await?;
                    Err(e.into())
                }
            }
        }

        Performed::Update { desired, result } => match result {
            Ok(()) => {
                let id = desired.id;
                registry
                    .update_instance(
                        id,
                        Box::new(move |i| {
                            i.plan_id = desired.plan_id;
                            i.parameters = desired.parameters;
                            i.context = desired.context;
                            i.transition(InstanceState::Provisioned);
                        }),
                    )
                    .await?;
                Ok(Completion::Updated)
            }
            Err(e) => {
                // Last-known-good configuration stays in place.
                registry
                    .update_instance(
                        desired.id,
                        Box::new(|i| i.transition(InstanceState::Provisioned)),
                    )
                    .await?;
                Err(e.into())
            }
        },

        Performed::Bind { binding_id, result } => match result {
            Ok(credentials) => {
                let stored = credentials.clone();
                registry
                    .update_binding(
                        binding_id,
                        Box::new(move |b| {
                            b.credentials = Some(stored);
                            b.transition(BindingState::Bound);
                        }),
                    )
                    .await?;
                Ok(Completion::Bound(credentials))
            }
            Err(e) => {
                registry.delete_binding(binding_id).await?;
                Err(e.into())
            }
        },

        Performed::Unbind { binding_id, result } => match result {
            Ok(()) => {
                registry.delete_binding(binding_id).await?;
                Ok(Completion::Unbound)
            }
            Err(e) => {
                registry
                    .update_binding(binding_id, Box::new(|b| b.transition(BindingState::Bound)))
                    .await?;
                Err(e.into())
            }
        },
    }
}
