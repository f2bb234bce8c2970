//! Build a broker from `broker.toml`.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use osb_core::{BrokerConfig, Catalog, ConfigError, StorageBackend};
use osb_state::{InstanceRegistry, MemoryRegistry, RedbRegistry};
use osb_tracker::{MemoryTracker, Reaper};

use crate::broker::Broker;
use crate::dispatcher::Dispatcher;
use crate::provisioner::Provisioner;

/// Wire a broker and its tracker reaper from configuration.
///
/// The reaper is returned unstarted; run it with a shutdown receiver.
pub fn from_config(
    config: &BrokerConfig,
    provisioner: Arc<dyn Provisioner>,
) -> anyhow::Result<(Broker, Reaper)> {
    let catalog = Catalog::from_file(&config.broker.catalog)
        .with_context(|| format!("loading catalog {}", config.broker.catalog.display()))?;
    info!(
        services = catalog.service_count(),
        plans = catalog.plan_count(),
        "catalog loaded"
    );

    let registry: Arc<dyn InstanceRegistry> = match config.storage.backend {
        StorageBackend::Memory => Arc::new(MemoryRegistry::new()),
        StorageBackend::Redb => {
            let path = config
                .storage
                .path
                .as_ref()
                .ok_or_else(|| ConfigError::MissingStoragePath("redb".to_string()))?;
            Arc::new(
                RedbRegistry::open(path)
                    .with_context(|| format!("opening registry {}", path.display()))?,
            )
        }
    };

    let tracker = Arc::new(MemoryTracker::new(config.retention()?));
    let reaper = Reaper::new(tracker.clone(), config.reap_interval()?);
    let broker = Broker::new(Arc::new(catalog), registry, tracker, provisioner)
        .with_dispatcher(Dispatcher::new(config.broker.max_concurrent_operations));
    Ok((broker, reaper))
}
