//! The broker interface.

use async_trait::async_trait;
use uuid::Uuid;

use osb_core::{
    BindRequest, BindResponse, CatalogResponse, DeprovisionRequest, DeprovisionResponse,
    LastOperationRequest, LastOperationResponse, ProvisionRequest, ProvisionResponse,
    ServiceInstanceResponse, UnbindRequest, UnbindResponse, UpdateRequest, UpdateResponse,
};

use crate::context::RequestContext;
use crate::error::BrokerResult;

/// The nine Open Service Broker operations.
///
/// With `accepts_incomplete`, mutating calls return as soon as the work is
/// accepted, with an operation token for [`last_operation`] polling.
/// Otherwise they block until the provisioner finishes and never expose a
/// token.
///
/// [`last_operation`]: OpenServiceBroker::last_operation
#[async_trait]
pub trait OpenServiceBroker: Send + Sync {
    async fn catalog(&self) -> BrokerResult<CatalogResponse>;

    async fn provision(
        &self,
        instance_id: Uuid,
        req: ProvisionRequest,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<ProvisionResponse>;

    async fn deprovision(
        &self,
        instance_id: Uuid,
        req: DeprovisionRequest,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<DeprovisionResponse>;

    async fn bind(
        &self,
        instance_id: Uuid,
        binding_id: Uuid,
        req: BindRequest,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<BindResponse>;

    async fn unbind(
        &self,
        instance_id: Uuid,
        binding_id: Uuid,
        req: UnbindRequest,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<UnbindResponse>;

    async fn update(
        &self,
        instance_id: Uuid,
        req: UpdateRequest,
        accepts_incomplete: bool,
        ctx: &RequestContext,
    ) -> BrokerResult<UpdateResponse>;

    async fn last_operation(
        &self,
        instance_id: Uuid,
        req: LastOperationRequest,
    ) -> BrokerResult<LastOperationResponse>;

    async fn get_service_instance(&self, instance_id: Uuid)
    -> BrokerResult<ServiceInstanceResponse>;

    async fn get_bind_instance(&self, binding_id: Uuid) -> BrokerResult<BindResponse>;
}
