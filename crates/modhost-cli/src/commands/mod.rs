//! CLI command definitions and dispatch.

pub mod install;
pub mod order;
pub mod tree;

use clap::{Parser, Subcommand};

use modhost_core::config::AppConfig;
use modhost_core::error::AppError;
use modhost_plugin::{PluginContext, PluginManager};

use crate::manifest::Manifest;
use crate::output::OutputFormat;

/// modhost: plugin lifecycle manager
#[derive(Debug, Parser)]
#[command(name = "modhost", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/modhost.toml")]
    pub config: String,

    /// Plugin manifest (overrides `plugins.manifest` from the config)
    #[arg(short, long)]
    pub manifest: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install every plugin in the manifest and report the outcome
    Install,
    /// Print the load order of the installed manifest
    Order,
    /// Print the dependency tree of one plugin
    Tree {
        /// Root plugin name
        name: String,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self, config: AppConfig) -> Result<(), AppError> {
        let manifest_path = self
            .manifest
            .clone()
            .unwrap_or_else(|| config.plugins.manifest.clone());
        let manifest = Manifest::load(&manifest_path)?;
        let manager = PluginManager::with_config(PluginContext::new(), &config.plugins);

        match &self.command {
            Commands::Install => install::execute(&manager, &manifest, self.format).await,
            Commands::Order => order::execute(&manager, &manifest, self.format).await,
            Commands::Tree { name } => tree::execute(&manager, &manifest, name, self.format).await,
        }
    }
}
