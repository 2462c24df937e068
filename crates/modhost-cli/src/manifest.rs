//! Plugin manifest loading.
//!
//! A manifest is a TOML file listing plugins to install:
//!
//! ```toml
//! [[plugins]]
//! name = "http"
//! version = "1.2.0"
//! dependencies = ["logger"]
//! options = { port = 8080 }
//! ```
//!
//! Manifest plugins are declarative: their install hook only logs the
//! options it was given, and fails when `fail_install` is set.

use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use modhost_core::error::AppError;
use modhost_core::result::AppResult;
use modhost_plugin::{HookError, PluginDescriptor, PluginOptions};

/// Parsed manifest file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    /// Plugins in declaration order.
    #[serde(default)]
    pub plugins: Vec<ManifestEntry>,
}

/// One `[[plugins]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    /// Plugin name.
    pub name: String,
    /// Optional version string.
    #[serde(default)]
    pub version: Option<String>,
    /// Names of plugins this one depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Options handed to the install hook.
    #[serde(default)]
    pub options: PluginOptions,
    /// Makes the install hook fail, for exercising failure handling.
    #[serde(default)]
    pub fail_install: bool,
}

impl Manifest {
    /// Reads a manifest from a TOML file.
    pub fn load(path: &str) -> AppResult<Self> {
        let source = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to read manifest '{path}': {e}")))?;

        source
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Invalid manifest '{path}': {e}")))
    }
}

impl ManifestEntry {
    /// Builds a descriptor whose hooks act out this entry.
    pub fn descriptor(&self) -> AppResult<Arc<PluginDescriptor>> {
        let name = self.name.clone();
        let fail = self.fail_install;

        let mut builder = PluginDescriptor::builder(&self.name)
            .dependencies(self.dependencies.iter().cloned())
            .install_fn(move |_, options| {
                let name = name.clone();
                async move {
                    if fail {
                        return Err(HookError::new(format!("{name} is configured to fail")));
                    }
                    info!(plugin = %name, options = %options, "Manifest plugin installed");
                    Ok(())
                }
            })
            .uninstall_fn(|_| async { Ok(()) });

        if let Some(version) = &self.version {
            builder = builder.version(version);
        }

        Ok(builder.build()?)
    }
}
