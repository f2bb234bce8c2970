use std::path::Path;

use osb_core::Catalog;

use super::config::load;

pub fn show(path: &Path, format: &str) -> anyhow::Result<()> {
    let (_, catalog) = load(path)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(catalog.response())?),
        _ => print!("{}", format_catalog(&catalog)),
    }
    Ok(())
}

fn format_catalog(catalog: &Catalog) -> String {
    let mut out = String::new();
    for service in &catalog.response().services {
        out.push_str(&format!(
            "{} ({}){}\n",
            service.name,
            service.id,
            if service.bindable { " bindable" } else { "" }
        ));
        for plan in &service.plans {
            let bindable = plan.bindable.unwrap_or(service.bindable);
            out.push_str(&format!("  {} ({})", plan.name, plan.id));
            if bindable != service.bindable {
                out.push_str(if bindable { " bindable" } else { " not bindable" });
            }
            if !plan.updates_to.is_empty() {
                out.push_str(&format!(" -> {}", plan.updates_to.join(", ")));
            }
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use osb_core::CatalogResponse;

    #[test]
    fn text_listing_shows_plans_and_edges() {
        let response: CatalogResponse = serde_json::from_str(
            r#"{ "services": [{
                "name": "postgres", "id": "svc-pg", "description": "", "bindable": true,
                "plans": [
                    { "id": "pg-small", "name": "small", "description": "", "updates_to": ["pg-large"] },
                    { "id": "pg-large", "name": "large", "description": "", "bindable": false }
                ]
            }]}"#,
        )
        .unwrap();
        let catalog = Catalog::new(response).unwrap();

        let text = format_catalog(&catalog);
        assert_eq!(
            text,
            "postgres (svc-pg) bindable\n  small (pg-small) -> pg-large\n  large (pg-large) not bindable\n"
        );
    }
}
