//! `order`: prints the load order of the installed manifest.

use serde::Serialize;
use tabled::Tabled;

use modhost_core::error::AppError;
use modhost_plugin::PluginManager;

use super::install;
use crate::manifest::Manifest;
use crate::output::{self, OutputFormat};

/// Load order row
#[derive(Debug, Serialize, Tabled)]
struct OrderRow {
    /// Position in load order
    position: usize,
    /// Plugin name
    name: String,
    /// Version
    version: String,
    /// Declared dependencies
    dependencies: String,
}

/// Execute the order command
pub async fn execute(
    manager: &PluginManager,
    manifest: &Manifest,
    format: OutputFormat,
) -> Result<(), AppError> {
    let report = install::install_all(manager, manifest).await?;
    if report.failed > 0 {
        output::print_warning(&format!(
            "{} plugins could not be installed and are left out",
            report.failed
        ));
    }

    let rows: Vec<OrderRow> = manager
        .topological_order()
        .into_iter()
        .enumerate()
        .filter_map(|(index, name)| {
            let descriptor = manager.get(&name)?;
            Some(OrderRow {
                position: index + 1,
                version: descriptor.version().unwrap_or("-").to_string(),
                dependencies: descriptor.unique_dependencies().join(", "),
                name,
            })
        })
        .collect();

    output::print_list(&rows, format);
    Ok(())
}
