//! Plugin manager configuration.

use serde::{Deserialize, Serialize};

/// Plugin manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Path to the TOML plugin manifest read by the CLI.
    #[serde(default = "default_manifest")]
    pub manifest: String,
    /// Whether an empty string is accepted as a plugin name.
    #[serde(default = "default_true")]
    pub allow_empty_names: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
            allow_empty_names: true,
        }
    }
}

fn default_manifest() -> String {
    "plugins.toml".to_string()
}

fn default_true() -> bool {
    true
}
