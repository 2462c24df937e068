//! Install coordinator: serialized `use` / `uninstall` per plugin name.
//!
//! An install runs as its own task so it completes even if every caller
//! stops awaiting it. Concurrent callers for the same name join the single
//! in-flight operation instead of invoking the install hook again.
//!
//! Each install task carries the chain of plugin names currently being
//! installed on it. A hook that re-enters `use_plugin` for a name already on
//! that chain gets `CircularDependency` rather than waiting on itself.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::context::PluginContext;
use crate::descriptor::{PluginDescriptor, PluginOptions};
use crate::error::{PluginError, PluginResult};
use crate::graph::DependencyGraph;
use crate::lock::{NameLocks, NameMarker};
use crate::registry::{PluginRecord, PluginRegistry, PluginStatus};

tokio::task_local! {
    /// Plugin names being installed on the current task, outermost first.
    static INSTALL_CHAIN: Vec<String>;
}

/// Returns the install chain of the current task (empty outside installs).
pub(crate) fn current_chain() -> Vec<String> {
    INSTALL_CHAIN.try_with(Clone::clone).unwrap_or_default()
}

/// Runs `future` with `chain` as its install chain.
pub(crate) async fn with_chain<F>(chain: Vec<String>, future: F) -> F::Output
where
    F: std::future::Future,
{
    INSTALL_CHAIN.scope(chain, future).await
}

type SharedInstall = Shared<BoxFuture<'static, PluginResult<()>>>;

/// Orchestrates plugin installation and removal.
#[derive(Clone)]
pub struct InstallCoordinator {
    registry: Arc<PluginRegistry>,
    graph: Arc<DependencyGraph>,
    locks: Arc<NameLocks>,
    /// Name → install currently in flight.
    in_flight: Arc<DashMap<String, SharedInstall>>,
    /// Names whose install hook is running.
    installing: Arc<DashSet<String>>,
    /// Options each installed plugin was installed with.
    options: Arc<DashMap<String, PluginOptions>>,
    /// Default context handed to hooks.
    context: PluginContext,
    allow_empty_names: bool,
}

impl std::fmt::Debug for InstallCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallCoordinator")
            .field("installed", &self.registry.size())
            .field("in_flight", &self.in_flight.len())
            .field("allow_empty_names", &self.allow_empty_names)
            .finish()
    }
}

impl InstallCoordinator {
    /// Creates a coordinator over the shared registry and graph.
    pub fn new(
        registry: Arc<PluginRegistry>,
        graph: Arc<DependencyGraph>,
        locks: Arc<NameLocks>,
        context: PluginContext,
        allow_empty_names: bool,
    ) -> Self {
        Self {
            registry,
            graph,
            locks,
            in_flight: Arc::new(DashMap::new()),
            installing: Arc::new(DashSet::new()),
            options: Arc::new(DashMap::new()),
            context,
            allow_empty_names,
        }
    }

    /// Installs a plugin with the default context.
    pub async fn use_plugin(
        &self,
        descriptor: Arc<PluginDescriptor>,
        options: PluginOptions,
    ) -> PluginResult<()> {
        self.use_plugin_with(descriptor, options, None).await
    }

    /// Installs a plugin, optionally shallow-overriding the default context.
    ///
    /// Installing an already registered name is a silent no-op. If an install
    /// for the name is in flight, this waits for it and returns its outcome.
    pub async fn use_plugin_with(
        &self,
        descriptor: Arc<PluginDescriptor>,
        options: PluginOptions,
        context: Option<PluginContext>,
    ) -> PluginResult<()> {
        let name = descriptor.name().to_string();

        if name.is_empty() && !self.allow_empty_names {
            return Err(PluginError::InvalidName { name });
        }

        if self.registry.has(&name) {
            debug!(plugin = %name, "Plugin already installed, skipping");
            return Ok(());
        }

        let chain = current_chain();
        if let Some(pos) = chain.iter().position(|n| *n == name) {
            let mut path = chain[pos..].to_vec();
            path.push(name.clone());
            return Err(PluginError::CircularDependency { name, path });
        }

        let (operation, start) = match self.in_flight.entry(name.clone()) {
            Entry::Occupied(entry) => {
                debug!(plugin = %name, "Joining in-flight install");
                (entry.get().clone(), None)
            }
            Entry::Vacant(entry) => {
                let (start_tx, start_rx) = oneshot::channel();
                let operation = self.spawn_install(descriptor, options, context, chain, start_rx);
                entry.insert(operation.clone());
                (operation, Some(start_tx))
            }
        };

        // The install task only starts once its in-flight entry exists, so its
        // own removal of that entry can never run first.
        if let Some(start) = start {
            let _ = start.send(());
        }

        operation.await
    }

    fn spawn_install(
        &self,
        descriptor: Arc<PluginDescriptor>,
        options: PluginOptions,
        context: Option<PluginContext>,
        mut chain: Vec<String>,
        start: oneshot::Receiver<()>,
    ) -> SharedInstall {
        let name = descriptor.name().to_string();
        chain.push(name.clone());

        let coordinator = self.clone();
        let task_name = name.clone();
        let handle = tokio::spawn(with_chain(chain, async move {
            let _ = start.await;
            let result = coordinator
                .install_exclusive(descriptor, options, context)
                .await;
            coordinator.in_flight.remove(&task_name);
            result
        }));

        async move {
            handle.await.unwrap_or_else(|e| {
                Err(PluginError::TaskAborted {
                    name,
                    reason: e.to_string(),
                })
            })
        }
        .boxed()
        .shared()
    }

    async fn install_exclusive(
        &self,
        descriptor: Arc<PluginDescriptor>,
        options: PluginOptions,
        context: Option<PluginContext>,
    ) -> PluginResult<()> {
        let _lock = self.locks.acquire(descriptor.name()).await;

        // A reload may have installed the name while we waited for the lock.
        if self.registry.has(descriptor.name()) {
            return Ok(());
        }

        self.install_locked(&descriptor, options, context.as_ref())
            .await
    }

    /// Rejects descriptors that would close a cycle or lack dependencies.
    pub(crate) fn validate(&self, descriptor: &PluginDescriptor) -> PluginResult<()> {
        let name = descriptor.name();

        if let Some(path) = self.graph.detect_cycle_for(descriptor) {
            warn!(plugin = %name, cycle = %path.join(" -> "), "Circular dependency rejected");
            return Err(PluginError::CircularDependency {
                name: name.to_string(),
                path,
            });
        }

        let missing = self.graph.check_missing(descriptor);
        if !missing.is_empty() {
            warn!(plugin = %name, missing = ?missing, "Missing dependencies");
            return Err(PluginError::MissingDependency {
                name: name.to_string(),
                missing,
            });
        }

        Ok(())
    }

    /// Validates and installs `descriptor`. The caller holds the name lock.
    pub(crate) async fn install_locked(
        &self,
        descriptor: &Arc<PluginDescriptor>,
        options: PluginOptions,
        context: Option<&PluginContext>,
    ) -> PluginResult<()> {
        let name = descriptor.name();
        let _installing = self.mark_installing(name);

        self.validate(descriptor)?;

        let ctx = match context {
            Some(overrides) => self.context.merged(overrides),
            None => self.context.clone(),
        };

        if let Err(e) = descriptor.invoke_install(&ctx, &options).await {
            warn!(plugin = %name, error = %e, "Plugin install failed");
            return Err(PluginError::InstallFailed {
                name: name.to_string(),
                source: e,
            });
        }

        self.commit(descriptor, options);

        info!(
            plugin = %name,
            version = descriptor.version().unwrap_or("-"),
            dependencies = descriptor.dependencies().len(),
            "Plugin installed"
        );
        Ok(())
    }

    /// Marks `name` as having an install hook running until the marker drops.
    pub(crate) fn mark_installing(&self, name: &str) -> Option<NameMarker> {
        NameMarker::try_mark(&self.installing, name)
    }

    /// Records a successfully installed descriptor. The caller holds the name lock.
    pub(crate) fn commit(&self, descriptor: &Arc<PluginDescriptor>, options: PluginOptions) {
        let name = descriptor.name().to_string();
        self.registry
            .register(PluginRecord::installed(descriptor.clone()));
        self.options.insert(name, options);
        self.graph.update(descriptor);
    }

    /// Uninstalls a plugin. Returns `false` if it was not installed.
    ///
    /// Without `force`, fails while other installed plugins depend on it.
    /// A failing uninstall hook leaves the plugin installed.
    pub async fn uninstall(&self, name: &str, force: bool) -> PluginResult<bool> {
        let coordinator = self.clone();
        let task_name = name.to_string();
        let handle =
            tokio::spawn(async move { coordinator.uninstall_exclusive(&task_name, force).await });

        handle.await.unwrap_or_else(|e| {
            Err(PluginError::TaskAborted {
                name: name.to_string(),
                reason: e.to_string(),
            })
        })
    }

    async fn uninstall_exclusive(&self, name: &str, force: bool) -> PluginResult<bool> {
        let _lock = self.locks.acquire(name).await;

        let Some(record) = self.registry.get(name) else {
            debug!(plugin = %name, "Uninstall of unknown plugin ignored");
            return Ok(false);
        };

        let dependents = self.graph.dependents(name);
        if !dependents.is_empty() {
            if !force {
                return Err(PluginError::HasDependents {
                    name: name.to_string(),
                    dependents,
                });
            }
            warn!(plugin = %name, dependents = ?dependents, "Forcing uninstall of a required plugin");
        }

        self.registry
            .set_status(name, PluginStatus::Uninstalling, record.last_error.clone());

        if let Err(e) = record.descriptor.invoke_uninstall(&self.context).await {
            warn!(plugin = %name, error = %e, "Plugin uninstall failed, keeping it installed");
            self.registry
                .set_status(name, record.status, Some(e.to_string()));
            return Err(PluginError::UninstallFailed {
                name: name.to_string(),
                source: e,
            });
        }

        self.registry.remove(name);
        self.graph.remove(name);
        self.options.remove(name);

        info!(plugin = %name, forced = force, "Plugin uninstalled");
        Ok(true)
    }

    /// Reports the lifecycle status of `name`, including in-flight installs.
    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        if let Some(record) = self.registry.get(name) {
            Some(record.status)
        } else if self.installing.contains(name) {
            Some(PluginStatus::Installing)
        } else if self.in_flight.contains_key(name) {
            Some(PluginStatus::Pending)
        } else {
            None
        }
    }

    /// Options the plugin was last installed with (`Null` if none).
    pub(crate) fn stored_options(&self, name: &str) -> PluginOptions {
        self.options
            .get(name)
            .map(|entry| entry.value().clone())
            .unwrap_or(PluginOptions::Null)
    }

    /// Drops stored options for every plugin.
    pub(crate) fn clear_options(&self) {
        self.options.clear();
    }

    /// Shared registry.
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Shared dependency graph.
    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    /// Shared name locks.
    pub(crate) fn locks(&self) -> &Arc<NameLocks> {
        &self.locks
    }

    /// Default hook context.
    pub fn context(&self) -> &PluginContext {
        &self.context
    }
}
