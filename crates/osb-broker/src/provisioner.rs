//! The provisioner seam: the external system that does the real work.

use async_trait::async_trait;
use thiserror::Error;

use osb_core::{BindInstance, BindingCredentials, ServiceInstance};

/// Failure reported by a provisioner. Never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionerError {
    /// The backing system refuses the request.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    Failed(String),
}

/// Side effects behind the broker's lifecycle operations.
///
/// Every call may block for an unbounded duration. The broker never calls
/// two methods for the same instance concurrently.
#[async_trait]
pub trait Provisioner: Send + Sync + 'static {
    /// Create the backing resource. Returns an optional dashboard URL.
    async fn create(&self, instance: &ServiceInstance) -> Result<Option<String>, ProvisionerError>;

    async fn destroy(&self, instance: &ServiceInstance) -> Result<(), ProvisionerError>;

    async fn bind(
        &self,
        instance: &ServiceInstance,
        binding: &BindInstance,
    ) -> Result<BindingCredentials, ProvisionerError>;

    async fn unbind(
        &self,
        instance: &ServiceInstance,
        binding: &BindInstance,
    ) -> Result<(), ProvisionerError>;

    /// Move `current` to the plan and parameters of `desired`.
    async fn reconfigure(
        &self,
        current: &ServiceInstance,
        desired: &ServiceInstance,
    ) -> Result<(), ProvisionerError>;
}
