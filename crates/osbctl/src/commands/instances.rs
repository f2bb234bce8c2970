use std::path::Path;

use anyhow::{Context, bail};
use osb_core::{BindInstance, ServiceInstance, StorageBackend};
use osb_state::{InstanceRegistry, RedbRegistry};
use serde_json::json;

use super::config::load;

pub async fn list(path: &Path, format: &str) -> anyhow::Result<()> {
    let (config, _) = load(path)?;
    if config.storage.backend == StorageBackend::Memory {
        println!("memory registry keeps no records outside the broker process");
        return Ok(());
    }
    let Some(db_path) = config.storage.path.as_ref() else {
        bail!("storage path is not set");
    };
    if !db_path.exists() {
        bail!("registry {} does not exist", db_path.display());
    }
    let registry = RedbRegistry::open(db_path)
        .with_context(|| format!("opening registry {}", db_path.display()))?;
    let entries = collect(&registry).await?;

    match format {
        "json" => {
            let value: Vec<_> = entries
                .iter()
                .map(|(instance, bindings)| json!({ "instance": instance, "bindings": bindings }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        _ => print!("{}", format_entries(&entries)),
    }
    Ok(())
}

async fn collect(
    registry: &dyn InstanceRegistry,
) -> anyhow::Result<Vec<(ServiceInstance, Vec<BindInstance>)>> {
    let mut instances = registry.list_instances().await?;
    instances.sort_by_key(|i| i.created_at);
    let mut entries = Vec::with_capacity(instances.len());
    for instance in instances {
        let bindings = registry.list_bindings(instance.id).await?;
        entries.push((instance, bindings));
    }
    Ok(entries)
}

fn format_entries(entries: &[(ServiceInstance, Vec<BindInstance>)]) -> String {
    if entries.is_empty() {
        return "no instances\n".to_string();
    }
    let mut out = String::new();
    for (instance, bindings) in entries {
        out.push_str(&format!(
            "{}  {}/{}  {}\n",
            instance.id, instance.service_id, instance.plan_id, instance.state
        ));
        for binding in bindings {
            out.push_str(&format!("  binding {}  {}\n", binding.id, binding.state));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use osb_core::{BindRequest, InstanceState, Parameters, ProvisionRequest};
    use uuid::Uuid;

    fn instance() -> ServiceInstance {
        let req = ProvisionRequest {
            organization_id: None,
            plan_id: "pg-small".to_string(),
            service_id: "svc-pg".to_string(),
            space_id: None,
            context: Default::default(),
            parameters: Parameters::new(),
        };
        let mut instance = ServiceInstance::provisioning(Uuid::new_v4(), &req);
        instance.transition(InstanceState::Provisioned);
        instance
    }

    #[tokio::test]
    async fn lists_instances_with_their_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let registry = RedbRegistry::open(&dir.path().join("registry.redb")).unwrap();
        let instance = instance();
        registry.put_instance(&instance).await.unwrap();
        let req = BindRequest {
            service_id: "svc-pg".to_string(),
            plan_id: "pg-small".to_string(),
            app_id: None,
            bind_resource: None,
            parameters: Parameters::new(),
        };
        let binding = BindInstance::binding(Uuid::new_v4(), instance.id, &req);
        registry.put_binding(&binding).await.unwrap();

        let entries = collect(&registry).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.len(), 1);

        let text = format_entries(&entries);
        assert!(text.starts_with(&format!("{}  svc-pg/pg-small  provisioned\n", instance.id)));
        assert!(text.contains(&format!("  binding {}  binding\n", binding.id)));
    }

    #[tokio::test]
    async fn empty_registry() {
        let registry = RedbRegistry::open_in_memory().unwrap();
        let entries = collect(&registry).await.unwrap();
        assert_eq!(format_entries(&entries), "no instances\n");
    }
}
