//! Provision, deprovision, and update.

use tracing::{debug, info};
use uuid::Uuid;

use osb_core::{
    BindingState, DeprovisionRequest, DeprovisionResponse, InstanceState, OperationKind,
    ParameterAccess, ProvisionRequest, ProvisionResponse, ServiceInstance, UpdateRequest,
    UpdateResponse,
};

use crate::broker::{Broker, Dispatched, unexpected};
use crate::context::RequestContext;
use crate::error::{BrokerError, BrokerResult};
use crate::jobs::{Completion, Work};

/// Error for a call that needs a settled instance but found one mid-operation.
fn busy(instance: &ServiceInstance) -> Option<BrokerError> {
    match instance.state {
        InstanceState::Provisioning => Some(BrokerError::ProvisionInProgress(instance.id)),
        InstanceState::Updating => Some(BrokerError::UpdateInProgress(instance.id)),
        InstanceState::Deprovisioning => Some(BrokerError::DeprovisionInProgress(instance.id)),
        InstanceState::Provisioned => None,
    }
}

impl Broker {
    pub(crate) async fn provision_instance(
        &self,
        instance_id: Uuid,
        req: ProvisionRequest,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<ProvisionResponse> {
        ctx.check()?;
        let catalog = &self.core.catalog;
        if catalog.service(&req.service_id).is_none() {
            return Err(BrokerError::NotFound(format!("service {}", req.service_id)));
        }
        match catalog.plan(&req.plan_id) {
            Some((service, _)) if service.id == req.service_id => {}
            _ => return Err(BrokerError::PlanNotFound(req.plan_id)),
        }

        let guard = self.lock(instance_id, ctx).await?;
        if let Some(existing) = self.find_instance(instance_id).await? {
            return match existing.state {
                InstanceState::Provisioned if existing.matches(&req) => {
                    debug!(%instance_id, "identical provision, returning existing instance");
                    Ok(ProvisionResponse {
                        dashboard_url: existing.dashboard_url,
                        operation: None,
                    })
                }
                InstanceState::Provisioned => Err(BrokerError::AlreadyProvisioned(instance_id)),
                _ => Err(busy(&existing).unwrap_or(BrokerError::AlreadyProvisioned(instance_id))),
            };
        }

        ctx.check()?;
        let token = self.begin(instance_id, None, OperationKind::Provision).await?;
        let instance = ServiceInstance::provisioning(instance_id, &req);
        if let Err(e) = self.core.registry.put_instance(&instance).await {
            let err = BrokerError::from(e);
            self.abandon(&token, &err).await;
            return Err(err);
        }
        info!(%instance_id, plan_id = %instance.plan_id, operation = %token, "provisioning");

        match self
            .dispatch(token, Work::Provision { instance }, guard, accepts_incomplete, ctx)
            .await?
        {
            Dispatched::Accepted(token) => Ok(ProvisionResponse {
                dashboard_url: None,
                operation: Some(token.to_string()),
            }),
            Dispatched::Finished(Completion::Provisioned { dashboard_url }) => {
                Ok(ProvisionResponse {
                    dashboard_url,
                    operation: None,
                })
            }
            Dispatched::Finished(other) => Err(unexpected(other)),
        }
    }

    pub(crate) async fn deprovision_instance(
        &self,
        instance_id: Uuid,
        req: DeprovisionRequest,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<DeprovisionResponse> {
        ctx.check()?;
        let guard = self.lock(instance_id, ctx).await?;
        let instance = self
            .find_instance(instance_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("instance {instance_id}")))?;
        if let Some(err) = busy(&instance) {
            return Err(err);
        }

        let bindings = self.core.registry.list_bindings(instance_id).await?;
        if !bindings.is_empty() && !req.cascade_bindings {
            return Err(BrokerError::BindingExists(format!(
                "instance {instance_id} has {} binding(s)",
                bindings.len()
            )));
        }
        for binding in &bindings {
            match binding.state {
                BindingState::Bound => {}
                BindingState::Binding => return Err(BrokerError::BindingInProgress(binding.id)),
                BindingState::Unbinding => {
                    return Err(BrokerError::UnbindingInProgress(binding.id));
                }
            }
        }

        ctx.check()?;
        let token = self
            .begin(instance_id, None, OperationKind::Deprovision)
            .await?;
        let marked = self.mark_deprovisioning(instance_id, &bindings).await;
        let instance = match marked {
            Ok(instance) => instance,
            Err(err) => {
                self.abandon(&token, &err).await;
                return Err(err);
            }
        };
        info!(
            %instance_id,
            bindings = bindings.len(),
            operation = %token,
            "deprovisioning"
        );

        let work = Work::Deprovision { instance, bindings };
        match self
            .dispatch(token, work, guard, accepts_incomplete, ctx)
            .await?
        {
            Dispatched::Accepted(token) => Ok(DeprovisionResponse {
                operation: Some(token.to_string()),
            }),
            Dispatched::Finished(Completion::Deprovisioned) => {
                Ok(DeprovisionResponse { operation: None })
            }
            Dispatched::Finished(other) => Err(unexpected(other)),
        }
    }

    async fn mark_deprovisioning(
        &self,
        instance_id: Uuid,
        bindings: &[osb_core::BindInstance],
    ) -> BrokerResult<ServiceInstance> {
        let registry = self.core.registry.as_ref();
        let instance = registry
            .update_instance(
                instance_id,
                Box::new(|i| i.transition(InstanceState::Deprovisioning)),
            )
            .await?;
        for binding in bindings {
            registry
                .update_binding(
                    binding.id,
                    Box::new(|b| b.transition(BindingState::Unbinding)),
                )
                .await?;
        }
        Ok(instance)
    }

    pub(crate) async fn update_instance(
        &self,
        instance_id: Uuid,
        req: UpdateRequest,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<UpdateResponse> {
        ctx.check()?;
        let guard = self.lock(instance_id, ctx).await?;
        let current = self
            .find_instance(instance_id)
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("instance {instance_id}")))?;
        if let Some(err) = busy(&current) {
            return Err(err);
        }

        let desired = self.plan_update(&current, &req)?;
        if desired.plan_id == current.plan_id
            && desired.parameters == current.parameters
            && desired.context == current.context
        {
            debug!(%instance_id, "update changes nothing");
            return Ok(UpdateResponse { operation: None });
        }

        ctx.check()?;
        let token = self.begin(instance_id, None, OperationKind::Update).await?;
        let marked = self
            .core
            .registry
            .update_instance(
                instance_id,
                Box::new(|i| i.transition(InstanceState::Updating)),
            )
            .await;
        if let Err(e) = marked {
            let err = BrokerError::from(e);
            self.abandon(&token, &err).await;
            return Err(err);
        }
        info!(
            %instance_id,
            from_plan = %current.plan_id,
            to_plan = %desired.plan_id,
            operation = %token,
            "updating"
        );

        match self
            .dispatch(
                token,
                Work::Update { current, desired },
                guard,
                accepts_incomplete,
                ctx,
            )
            .await?
        {
            Dispatched::Accepted(token) => Ok(UpdateResponse {
                operation: Some(token.to_string()),
            }),
            Dispatched::Finished(Completion::Updated) => Ok(UpdateResponse { operation: None }),
            Dispatched::Finished(other) => Err(unexpected(other)),
        }
    }

    /// Validate an update against the catalog and build the target record.
    ///
    /// Checks run in order: target plan exists, every named parameter is
    /// updatable under the target plan, then the plan change is an edge of
    /// the update graph.
    fn plan_update(
        &self,
        current: &ServiceInstance,
        req: &UpdateRequest,
    ) -> BrokerResult<ServiceInstance> {
        let catalog = &self.core.catalog;
        let target = req.plan_id.as_deref().unwrap_or(&current.plan_id);
        let (service, _) = catalog
            .plan(target)
            .ok_or_else(|| BrokerError::PlanNotFound(target.to_string()))?;

        for name in req.parameters.keys() {
            match catalog.parameter_access(target, name) {
                ParameterAccess::Updatable => {}
                ParameterAccess::CreateOnly => {
                    return Err(BrokerError::ParameterNotUpdatable(name.clone()));
                }
                ParameterAccess::Unknown => {
                    return Err(BrokerError::ParameterNotFound(name.clone()));
                }
            }
        }

        if target != current.plan_id
            && (service.id != current.service_id
                || !service.plan_updatable
                || !catalog.can_update(&current.plan_id, target))
        {
            return Err(BrokerError::PlanUpdateNotPossible {
                from: current.plan_id.clone(),
                to: target.to_string(),
            });
        }

        let mut desired = current.clone();
        desired.plan_id = target.to_string();
        for (name, value) in &req.parameters {
            desired.parameters.insert(name.clone(), value.clone());
        }
        if !req.context.is_empty() {
            desired.context = req.context.clone();
        }
        Ok(desired)
    }
}
