//! Plugin manager: the public surface of the lifecycle subsystem.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tracing::info;

use modhost_core::config::plugin::PluginConfig;

use crate::context::PluginContext;
use crate::coordinator::InstallCoordinator;
use crate::descriptor::{PluginDescriptor, PluginOptions};
use crate::error::{HookError, PluginResult};
use crate::graph::{CacheStats, DependencyGraph};
use crate::hot_reload::{HotReloadController, ReloadEvent, ReloadListener, ReloadSubscription};
use crate::lock::NameLocks;
use crate::registry::{PluginRecord, PluginRegistry, PluginStatus};

/// Installs, removes and hot reloads plugins.
///
/// The manager is a cheap handle: clones share the same registry, graph,
/// locks and listeners.
#[derive(Debug, Clone)]
pub struct PluginManager {
    coordinator: InstallCoordinator,
    reloader: HotReloadController,
}

impl PluginManager {
    /// Creates a manager with default configuration.
    pub fn new(context: PluginContext) -> Self {
        Self::with_config(context, &PluginConfig::default())
    }

    /// Creates a manager from configuration.
    pub fn with_config(context: PluginContext, config: &PluginConfig) -> Self {
        let registry = Arc::new(PluginRegistry::new());
        let graph = Arc::new(DependencyGraph::new(registry.clone()));
        let coordinator = InstallCoordinator::new(
            registry,
            graph,
            Arc::new(NameLocks::new()),
            context,
            config.allow_empty_names,
        );
        let reloader = HotReloadController::new(coordinator.clone());

        Self {
            coordinator,
            reloader,
        }
    }

    /// Installs a plugin. Repeated calls for an installed name are no-ops.
    pub async fn use_plugin(
        &self,
        descriptor: Arc<PluginDescriptor>,
        options: PluginOptions,
    ) -> PluginResult<()> {
        self.coordinator.use_plugin(descriptor, options).await
    }

    /// Installs a plugin with `context` shallow-merged over the default context.
    pub async fn use_plugin_with(
        &self,
        descriptor: Arc<PluginDescriptor>,
        options: PluginOptions,
        context: PluginContext,
    ) -> PluginResult<()> {
        self.coordinator
            .use_plugin_with(descriptor, options, Some(context))
            .await
    }

    /// Uninstalls a plugin. Returns `false` if it was not installed.
    pub async fn uninstall(&self, name: &str, force: bool) -> PluginResult<bool> {
        self.coordinator.uninstall(name, force).await
    }

    /// Descriptor of an installed plugin.
    pub fn get(&self, name: &str) -> Option<Arc<PluginDescriptor>> {
        self.coordinator
            .registry()
            .get(name)
            .map(|record| record.descriptor)
    }

    /// Full registry record of a plugin.
    pub fn record(&self, name: &str) -> Option<PluginRecord> {
        self.coordinator.registry().get(name)
    }

    /// Whether a plugin is registered.
    pub fn has(&self, name: &str) -> bool {
        self.coordinator.registry().has(name)
    }

    /// All registered plugins, oldest install first.
    pub fn get_all(&self) -> Vec<PluginRecord> {
        self.coordinator.registry().all()
    }

    /// Number of registered plugins.
    pub fn size(&self) -> usize {
        self.coordinator.registry().size()
    }

    /// Forgets every plugin without running uninstall hooks.
    pub fn clear(&self) {
        let count = self.size();
        self.coordinator.registry().clear();
        self.coordinator.graph().clear();
        self.coordinator.clear_options();
        info!(plugins = count, "Plugin registry cleared");
    }

    /// Lifecycle status of a plugin, including installs still in flight.
    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.coordinator.status(name)
    }

    /// Atomically replaces an installed plugin, rolling back on failure.
    pub async fn hot_reload(
        &self,
        name: &str,
        descriptor: Arc<PluginDescriptor>,
    ) -> PluginResult<bool> {
        self.reloader.hot_reload(name, descriptor).await
    }

    /// Registers a listener called after each successful reload of `name`.
    pub fn on_hot_reload(&self, name: &str, listener: Arc<dyn ReloadListener>) -> ReloadSubscription {
        self.reloader.on_hot_reload(name, listener)
    }

    /// Registers an async closure called after each successful reload of `name`.
    pub fn on_hot_reload_fn<F, Fut>(&self, name: &str, handler: F) -> ReloadSubscription
    where
        F: Fn(ReloadEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.reloader.on_hot_reload_fn(name, handler)
    }

    /// Number of reload listeners for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.reloader.listener_count(name)
    }

    /// Whether `name` is installed and provides an uninstall hook.
    pub fn is_hot_reloadable(&self, name: &str) -> bool {
        self.reloader.is_hot_reloadable(name)
    }

    /// Every plugin reachable from `name`, mapped to its dependencies.
    pub fn dependency_tree(&self, name: &str) -> BTreeMap<String, Vec<String>> {
        self.coordinator.graph().dependency_tree(name)
    }

    /// Installed plugins ordered so each follows its dependencies.
    pub fn topological_order(&self) -> Vec<String> {
        self.coordinator.graph().topological_order()
    }

    /// Installed plugins that depend on `name`.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.coordinator.graph().dependents(name)
    }

    /// Topological order cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.coordinator.graph().cache_stats()
    }

    /// Default context handed to hooks.
    pub fn context(&self) -> &PluginContext {
        self.coordinator.context()
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new(PluginContext::new())
    }
}
