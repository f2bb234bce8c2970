use std::path::Path;

use anyhow::{Context, bail};
use osb_core::{BrokerConfig, Catalog};
use tracing::info;

pub fn init(dir: &Path, catalog: &str) -> anyhow::Result<()> {
    let output = dir.join("broker.toml");
    if output.exists() {
        bail!("{} already exists", output.display());
    }
    std::fs::create_dir_all(dir)?;
    std::fs::write(&output, BrokerConfig::scaffold(catalog).to_toml_string()?)?;
    println!("✓ Generated {}", output.display());
    Ok(())
}

pub fn check(path: &Path) -> anyhow::Result<()> {
    let (config, catalog) = load(path)?;
    println!("✓ {} is valid", path.display());
    println!(
        "  catalog:    {} ({} services, {} plans)",
        config.broker.catalog.display(),
        catalog.service_count(),
        catalog.plan_count()
    );
    println!(
        "  operations: retention {}, reaped every {}, at most {} at once",
        config.operations.retention,
        config.operations.reap_interval,
        config.broker.max_concurrent_operations
    );
    match &config.storage.path {
        Some(storage) => println!("  storage:    {:?} at {}", config.storage.backend, storage.display()),
        None => println!("  storage:    {:?}", config.storage.backend),
    }
    Ok(())
}

/// Parse and validate `broker.toml` and the catalog it names.
pub fn load(path: &Path) -> anyhow::Result<(BrokerConfig, Catalog)> {
    let config = BrokerConfig::from_file(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let catalog = Catalog::from_file(&config.broker.catalog)
        .with_context(|| format!("loading catalog {}", config.broker.catalog.display()))?;
    info!(
        services = catalog.service_count(),
        plans = catalog.plan_count(),
        "catalog loaded"
    );
    Ok((config, catalog))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "services": [{
            "name": "postgres",
            "id": "svc-pg",
            "description": "PostgreSQL",
            "bindable": true,
            "plans": [
                { "id": "pg-small", "name": "small", "description": "1 vCPU", "updates_to": ["pg-large"] },
                { "id": "pg-large", "name": "large", "description": "4 vCPU" }
            ]
        }]
    }"#;

    #[test]
    fn init_then_check() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("catalog.json"), CATALOG).unwrap();

        init(dir.path(), "catalog.json").unwrap();
        let config_path = dir.path().join("broker.toml");
        assert!(config_path.exists());
        check(&config_path).unwrap();

        let (config, catalog) = load(&config_path).unwrap();
        assert_eq!(config.broker.catalog, dir.path().join("catalog.json"));
        assert_eq!(catalog.plan_count(), 2);
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path(), "catalog.json").unwrap();
        assert!(init(dir.path(), "catalog.json").is_err());
    }

    #[test]
    fn check_rejects_broken_update_graph() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("catalog.json"),
            CATALOG.replace(r#"["pg-large"]"#, r#"["pg-huge"]"#),
        )
        .unwrap();
        init(dir.path(), "catalog.json").unwrap();

        let err = check(&dir.path().join("broker.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("loading catalog"));
    }

    #[test]
    fn check_rejects_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check(&dir.path().join("broker.toml")).is_err());
    }
}
