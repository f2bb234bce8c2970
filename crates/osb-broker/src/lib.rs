//! osb-broker: the Open Service Broker orchestrator.
//!
//! [`Broker`] implements [`OpenServiceBroker`] over three injected seams:
//!
//! - an [`InstanceRegistry`](osb_state::InstanceRegistry) holding instance
//!   and binding records
//! - an [`OperationTracker`](osb_tracker::OperationTracker) holding
//!   operation records for last-operation polling
//! - a [`Provisioner`] performing the real side effects
//!
//! Calls on one instance are serialized; calls on different instances run
//! in parallel. Accepted asynchronous work runs on the [`Dispatcher`] and
//! reports back only through the tracker.

pub mod api;
pub mod assemble;
mod bindings;
pub mod broker;
pub mod context;
pub mod dispatcher;
pub mod error;
mod instances;
mod jobs;
pub mod locks;
pub mod provisioner;

pub use api::OpenServiceBroker;
pub use assemble::from_config;
pub use broker::Broker;
pub use context::RequestContext;
pub use dispatcher::Dispatcher;
pub use error::{BrokerError, BrokerResult, ErrorKind};
pub use provisioner::{Provisioner, ProvisionerError};
