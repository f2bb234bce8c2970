//! Bind and unbind.

use tracing::{debug, error, info};
use uuid::Uuid;

use osb_core::{
    BindInstance, BindRequest, BindResponse, BindingState, InstanceState, OperationKind,
    OperationState, ServiceInstance, UnbindRequest, UnbindResponse,
};
use osb_state::StateError;

use crate::broker::{Broker, Dispatched, unexpected};
use crate::context::RequestContext;
use crate::error::{BrokerError, BrokerResult};
use crate::jobs::{Completion, Work};

impl Broker {
    async fn find_binding(&self, binding_id: Uuid) -> BrokerResult<Option<BindInstance>> {
        match self.core.registry.get_binding(binding_id).await {
            Ok(binding) => Ok(Some(binding)),
            Err(StateError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Token of the bind still running for `binding_id`, if any.
    async fn active_bind(&self, instance_id: Uuid, binding_id: Uuid) -> Option<String> {
        let record = self.core.tracker.latest(instance_id).await.ok()?;
        (record.state == OperationState::InProgress
            && record.kind == OperationKind::Bind
            && record.binding_id == Some(binding_id))
        .then(|| record.token.to_string())
    }

    /// The instance owning `binding`. A binding without one is a broken
    /// registry, not a missing resource.
    pub(crate) async fn owner_of(&self, binding: &BindInstance) -> BrokerResult<ServiceInstance> {
        match self.find_instance(binding.instance_id).await? {
            Some(instance) => Ok(instance),
            None => {
                error!(
                    instance_id = %binding.instance_id,
                    binding_id = %binding.id,
                    "binding refers to a missing instance"
                );
                Err(BrokerError::Internal(format!(
                    "binding {} refers to missing instance {}",
                    binding.id, binding.instance_id
                )))
            }
        }
    }

    pub(crate) async fn create_binding(
        &self,
        instance_id: Uuid,
        binding_id: Uuid,
        req: BindRequest,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<BindResponse> {
        ctx.check()?;
        let guard = self.lock(instance_id, ctx).await?;
        let instance = self
            .find_instance(instance_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("instance {instance_id}")))?;
        match instance.state {
            InstanceState::Provisioned => {}
            InstanceState::Provisioning => return Err(BrokerError::ProvisionInProgress(instance_id)),
            InstanceState::Updating => return Err(BrokerError::UpdateInProgress(instance_id)),
            InstanceState::Deprovisioning => {
                return Err(BrokerError::DeprovisionInProgress(instance_id));
            }
        }
        if !self.core.catalog.is_bindable(&instance.plan_id) {
            return Err(BrokerError::Forbidden(format!(
                "plan {} does not support bindings",
                instance.plan_id
            )));
        }

        if let Some(existing) = self.find_binding(binding_id).await? {
            let identical = existing.matches(instance_id, &req);
            return match existing.state {
                BindingState::Bound if identical => {
                    debug!(%instance_id, %binding_id, "identical bind, returning existing credentials");
                    Ok(existing
                        .credentials
                        .map(|c| c.to_response())
                        .unwrap_or_default())
                }
                BindingState::Binding if identical && accepts_incomplete => {
                    match self.active_bind(instance_id, binding_id).await {
                        Some(token) => {
                            debug!(
                                %instance_id,
                                %binding_id,
                                operation = %token,
                                "identical bind, returning running operation"
                            );
                            Ok(BindResponse {
                                operation: Some(token),
                                ..BindResponse::default()
                            })
                        }
                        None => Err(BrokerError::BindingInProgress(binding_id)),
                    }
                }
                BindingState::Binding if identical => Err(BrokerError::BindingInProgress(binding_id)),
                BindingState::Unbinding if identical => {
                    Err(BrokerError::UnbindingInProgress(binding_id))
                }
                _ => Err(BrokerError::BindingExists(format!(
                    "binding {binding_id} exists with different attributes"
                ))),
            };
        }

        ctx.check()?;
        let token = self
            .begin(instance_id, Some(binding_id), OperationKind::Bind)
            .await?;
        let binding = BindInstance::binding(binding_id, instance_id, &req);
        if let Err(e) = self.core.registry.put_binding(&binding).await {
            let err = BrokerError::from(e);
            self.abandon(&token, &err).await;
            return Err(err);
        }
        info!(%instance_id, %binding_id, operation = %token, "binding");

        match self
            .dispatch(
                token,
                Work::Bind { instance, binding },
                guard,
                accepts_incomplete,
                ctx,
            )
            .await?
        {
            Dispatched::Accepted(token) => Ok(BindResponse {
                operation: Some(token.to_string()),
                ..BindResponse::default()
            }),
            Dispatched::Finished(Completion::Bound(credentials)) => Ok(credentials.to_response()),
            Dispatched::Finished(other) => Err(unexpected(other)),
        }
    }

    pub(crate) async fn remove_binding(
        &self,
        instance_id: Uuid,
        binding_id: Uuid,
        _req: UnbindRequest,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<UnbindResponse> {
        ctx.check()?;
        let guard = self.lock(instance_id, ctx).await?;
        let binding = self
            .find_binding(binding_id)
            .await?
            .filter(|b| b.instance_id == instance_id)
            .ok_or_else(|| {
                BrokerError::NotFound(format!("binding {binding_id} of instance {instance_id}"))
            })?;
        let instance = self.owner_of(&binding).await?;
        if instance.state == InstanceState::Deprovisioning {
            return Err(BrokerError::DeprovisionInProgress(instance_id));
        }
        match binding.state {
            BindingState::Bound => {}
            BindingState::Binding => return Err(BrokerError::BindingInProgress(binding_id)),
            BindingState::Unbinding => return Err(BrokerError::UnbindingInProgress(binding_id)),
        }

        ctx.check()?;
        let token = self
            .begin(instance_id, Some(binding_id), OperationKind::Unbind)
            .await?;
        let marked = self
            .core
            .registry
            .update_binding(
                binding_id,
                Box::new(|b| b.transition(BindingState::Unbinding)),
            )
            .await;
        let binding = match marked {
            Ok(binding) => binding,
            Err(e) => {
                let err = BrokerError::from(e);
                self.abandon(&token, &err).await;
                return Err(err);
            }
        };
        info!(%instance_id, %binding_id, operation = %token, "unbinding");

        match self
            .dispatch(
                token,
                Work::Unbind { instance, binding },
                guard,
                accepts_incomplete,
                ctx,
            )
            .await?
        {
            Dispatched::Accepted(token) => Ok(UnbindResponse {
                operation: Some(token.to_string()),
            }),
            Dispatched::Finished(Completion::Unbound) => Ok(UnbindResponse { operation: None }),
            Dispatched::Finished(other) => Err(unexpected(other)),
        }
    }
}
