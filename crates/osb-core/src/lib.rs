//! osb-core: shared types for the Open Service Broker core.
//!
//! - **`model`**: request/response shapes of the Open Service Broker API
//! - **`types`**: registry records, lifecycle states, and operation records
//! - **`catalog`**: the immutable service catalog and its plan update graph
//! - **`config`**: `broker.toml` parsing

pub mod catalog;
pub mod config;
pub mod model;
pub mod types;

pub use catalog::{Catalog, CatalogError, ParameterAccess};
pub use config::{BrokerConfig, ConfigError, StorageBackend, parse_duration};
pub use model::*;
pub use types::*;
