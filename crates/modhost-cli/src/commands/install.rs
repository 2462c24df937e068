//! `install`: installs a manifest in dependency-resolving passes.

use serde::Serialize;
use tabled::Tabled;
use tracing::debug;

use modhost_core::error::AppError;
use modhost_plugin::{PluginError, PluginManager};

use crate::manifest::{Manifest, ManifestEntry};
use crate::output::{self, OutputFormat};

/// Install result row
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct InstallRow {
    /// Plugin name
    pub name: String,
    /// Version
    pub version: String,
    /// Outcome
    pub status: String,
    /// Error detail
    pub detail: String,
}

impl InstallRow {
    fn new(entry: &ManifestEntry, status: &str, detail: String) -> Self {
        Self {
            name: entry.name.clone(),
            version: entry.version.clone().unwrap_or_else(|| "-".to_string()),
            status: status.to_string(),
            detail,
        }
    }
}

/// Outcome of installing a manifest.
#[derive(Debug, Default)]
pub struct InstallReport {
    /// One row per manifest entry, in install order then failure order.
    pub rows: Vec<InstallRow>,
    /// Entries that could not be installed.
    pub failed: usize,
}

/// Installs every manifest entry, retrying entries whose dependencies were
/// missing until a pass makes no progress.
pub async fn install_all(manager: &PluginManager, manifest: &Manifest) -> Result<InstallReport, AppError> {
    let mut report = InstallReport::default();
    let mut pending: Vec<(&ManifestEntry, Option<PluginError>)> =
        manifest.plugins.iter().map(|entry| (entry, None)).collect();
    let mut pass = 0;

    loop {
        pass += 1;
        let mut progressed = false;
        let mut waiting = Vec::new();

        for (entry, _) in pending {
            let descriptor = entry.descriptor()?;
            match manager.use_plugin(descriptor, entry.options.clone()).await {
                Ok(()) => {
                    progressed = true;
                    report.rows.push(InstallRow::new(entry, "installed", String::new()));
                }
                Err(e @ PluginError::MissingDependency { .. }) => waiting.push((entry, Some(e))),
                Err(e) => {
                    report.failed += 1;
                    report.rows.push(InstallRow::new(entry, "failed", e.to_string()));
                }
            }
        }

        debug!(pass, waiting = waiting.len(), "Install pass finished");
        pending = waiting;
        if pending.is_empty() || !progressed {
            break;
        }
    }

    for (entry, error) in pending {
        report.failed += 1;
        let detail = error.map(|e| e.to_string()).unwrap_or_default();
        report.rows.push(InstallRow::new(entry, "unresolved", detail));
    }

    Ok(report)
}

/// Execute the install command
pub async fn execute(
    manager: &PluginManager,
    manifest: &Manifest,
    format: OutputFormat,
) -> Result<(), AppError> {
    let report = install_all(manager, manifest).await?;
    output::print_list(&report.rows, format);

    if report.failed > 0 {
        return Err(AppError::plugin(format!(
            "{} of {} plugins could not be installed",
            report.failed,
            manifest.plugins.len()
        )));
    }

    if format == OutputFormat::Table {
        output::print_success(&format!("Installed {} plugins", manager.size()));
    }
    Ok(())
}
