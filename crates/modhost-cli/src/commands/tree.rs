//! `tree`: prints the dependency tree of one plugin.

use serde::Serialize;
use tabled::Tabled;

use modhost_core::error::AppError;
use modhost_plugin::PluginManager;

use super::install;
use crate::manifest::Manifest;
use crate::output::{self, OutputFormat};

/// Dependency tree row
#[derive(Debug, Serialize, Tabled)]
struct TreeRow {
    /// Plugin name
    plugin: String,
    /// Plugins it depends on
    dependencies: String,
}

/// Execute the tree command
pub async fn execute(
    manager: &PluginManager,
    manifest: &Manifest,
    name: &str,
    format: OutputFormat,
) -> Result<(), AppError> {
    install::install_all(manager, manifest).await?;

    if !manager.has(name) {
        return Err(AppError::not_found(format!("Plugin '{name}' is not installed")));
    }

    let tree = manager.dependency_tree(name);
    if format == OutputFormat::Json {
        let json = serde_json::to_string_pretty(&tree)?;
        println!("{json}");
        return Ok(());
    }

    let rows: Vec<TreeRow> = tree
        .into_iter()
        .map(|(plugin, dependencies)| TreeRow {
            plugin,
            dependencies: if dependencies.is_empty() {
                "-".to_string()
            } else {
                dependencies.join(", ")
            },
        })
        .collect();
    output::print_list(&rows, format);
    Ok(())
}
