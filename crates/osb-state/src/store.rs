//! RedbRegistry: redb-backed instance registry.
//!
//! Values are JSON-serialized into redb's `&[u8]` columns. Every mutation
//! runs inside one write transaction; redb serializes write transactions,
//! so a read-modify-write never interleaves with another writer.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, Table, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use osb_core::{BindInstance, InstanceState, ServiceInstance};

use crate::error::{StateError, StateResult};
use crate::registry::{BindingMutator, InstanceMutator, InstanceRegistry};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Read and decode one row inside a write transaction.
fn load<T: DeserializeOwned>(
    table: &Table<'_, &'static str, &'static [u8]>,
    key: &str,
) -> StateResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => decode(guard.value()).map(Some),
        None => Ok(None),
    }
}

fn store<T: Serialize>(
    table: &mut Table<'_, &'static str, &'static [u8]>,
    key: &str,
    value: &T,
) -> StateResult<()> {
    let bytes = encode(value)?;
    table
        .insert(key, bytes.as_slice())
        .map_err(map_err!(Write))?;
    Ok(())
}

/// Thread-safe registry backed by redb.
#[derive(Clone)]
pub struct RedbRegistry {
    db: Arc<Database>,
}

impl RedbRegistry {
    /// Open (or create) a persistent registry at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let registry = Self { db: Arc::new(db) };
        registry.ensure_tables()?;
        debug!(?path, "registry opened");
        Ok(registry)
    }

    /// Create an ephemeral in-memory registry (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let registry = Self { db: Arc::new(db) };
        registry.ensure_tables()?;
        debug!("in-memory registry opened");
        Ok(registry)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(BINDINGS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn read_one<T: DeserializeOwned>(
        &self,
        def: TableDefinition<'_, &'static str, &'static [u8]>,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => decode(guard.value()).map(Some),
            None => Ok(None),
        }
    }

    fn read_all<T: DeserializeOwned>(
        &self,
        def: TableDefinition<'_, &'static str, &'static [u8]>,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }
}

#[async_trait]
impl InstanceRegistry for RedbRegistry {
    async fn get_instance(&self, id: Uuid) -> StateResult<ServiceInstance> {
        self.read_one(INSTANCES, &id.to_string())?
            .ok_or_else(|| StateError::NotFound(format!("instance {id}")))
    }

    async fn put_instance(&self, instance: &ServiceInstance) -> StateResult<()> {
        let key = instance.id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Duplicate(format!("instance {key}")));
            }
            store(&mut table, &key, instance)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(instance_id = %key, state = %instance.state, "instance stored");
        Ok(())
    }

    async fn update_instance(
        &self,
        id: Uuid,
        mutator: InstanceMutator,
    ) -> StateResult<ServiceInstance> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let mut instance: ServiceInstance = load(&table, &key)?
                .ok_or_else(|| StateError::NotFound(format!("instance {id}")))?;
            let binding_ids = instance.binding_ids.clone();
            mutator(&mut instance);
            instance.id = id;
            instance.binding_ids = binding_ids;
            store(&mut table, &key, &instance)?;
            instance
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(instance_id = %id, state = %updated.state, "instance updated");
        Ok(updated)
    }

    async fn delete_instance(&self, id: Uuid) -> StateResult<()> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let instance: ServiceInstance = load(&table, &key)?
                .ok_or_else(|| StateError::NotFound(format!("instance {id}")))?;
            if !instance.binding_ids.is_empty() {
                return Err(StateError::Conflict(format!(
                    "instance {id} still owns {} binding(s)",
                    instance.binding_ids.len()
                )));
            }
            table.remove(key.as_str()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(instance_id = %id, "instance deleted");
        Ok(())
    }

    async fn list_instances(&self) -> StateResult<Vec<ServiceInstance>> {
        self.read_all(INSTANCES)
    }

    async fn get_binding(&self, id: Uuid) -> StateResult<BindInstance> {
        self.read_one(BINDINGS, &id.to_string())?
            .ok_or_else(|| StateError::NotFound(format!("binding {id}")))
    }

    async fn put_binding(&self, binding: &BindInstance) -> StateResult<()> {
        let key = binding.id.to_string();
        let instance_key = binding.instance_id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut bindings = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
            let mut instances = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            if bindings.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Duplicate(format!("binding {key}")));
            }
            let mut instance: ServiceInstance = load(&instances, &instance_key)?
                .ok_or_else(|| StateError::NotFound(format!("instance {instance_key}")))?;
            if instance.state == InstanceState::Deprovisioning {
                return Err(StateError::Conflict(format!(
                    "instance {instance_key} is deprovisioning"
                )));
            }
            instance.binding_ids.insert(binding.id);
            store(&mut instances, &instance_key, &instance)?;
            store(&mut bindings, &key, binding)?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(binding_id = %key, instance_id = %instance_key, "binding stored");
        Ok(())
    }

    async fn update_binding(
        &self,
        id: Uuid,
        mutator: BindingMutator,
    ) -> StateResult<BindInstance> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
            let mut binding: BindInstance = load(&table, &key)?
                .ok_or_else(|| StateError::NotFound(format!("binding {id}")))?;
            let instance_id = binding.instance_id;
            mutator(&mut binding);
            binding.id = id;
            binding.instance_id = instance_id;
            store(&mut table, &key, &binding)?;
            binding
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    async fn delete_binding(&self, id: Uuid) -> StateResult<()> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let instance_id = {
            let mut bindings = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
            let mut instances = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let binding: BindInstance = load(&bindings, &key)?
                .ok_or_else(|| StateError::NotFound(format!("binding {id}")))?;
            bindings.remove(key.as_str()).map_err(map_err!(Write))?;

            let instance_key = binding.instance_id.to_string();
            if let Some(mut instance) = load::<ServiceInstance>(&instances, &instance_key)? {
                instance.binding_ids.remove(&id);
                store(&mut instances, &instance_key, &instance)?;
            }
            binding.instance_id
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(binding_id = %id, %instance_id, "binding deleted");
        Ok(())
    }

    async fn list_bindings(&self, instance_id: Uuid) -> StateResult<Vec<BindInstance>> {
        let all: Vec<BindInstance> = self.read_all(BINDINGS)?;
        Ok(all
            .into_iter()
            .filter(|b| b.instance_id == instance_id)
            .collect())
    }
}
