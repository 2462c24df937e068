//! Hot reload: atomic replacement of an installed plugin with rollback.
//!
//! A reload runs in two phases while holding the plugin's name lock:
//!
//! 1. Snapshot: the current record is taken out of the registry. Its graph
//!    edges stay, joined by the new version's edges.
//! 2. Commit or compensate: the new version is installed and registered; if
//!    its install hook fails the snapshot is reinstalled instead.
//!
//! Between the two phases `has(name)` reports `false`. Reloads of one name
//! are additionally guarded by a reloading marker, so a second reload is
//! rejected immediately instead of queueing behind the first.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::coordinator::{InstallCoordinator, current_chain, with_chain};
use crate::descriptor::{PluginDescriptor, panic_message};
use crate::error::{HookError, PluginError, PluginResult};
use crate::lock::NameMarker;
use crate::registry::{PluginRecord, PluginStatus};

/// Notification sent to reload listeners after a successful hot reload.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadEvent {
    /// Reloaded plugin.
    pub name: String,
    /// Version that was replaced.
    pub previous_version: Option<String>,
    /// Version now installed.
    pub current_version: Option<String>,
    /// When the new version went live.
    pub reloaded_at: DateTime<Utc>,
}

/// Callback invoked after a plugin has been hot reloaded.
#[async_trait]
pub trait ReloadListener: Send + Sync {
    /// Handles a completed reload. Errors are logged and otherwise ignored.
    async fn on_reload(&self, event: &ReloadEvent) -> Result<(), HookError>;
}

type ListenerFn = Arc<dyn Fn(ReloadEvent) -> BoxFuture<'static, Result<(), HookError>> + Send + Sync>;

/// A closure-based reload listener.
pub(crate) struct ClosureListener {
    handler: ListenerFn,
}

impl ClosureListener {
    /// Wraps an async closure.
    pub(crate) fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(ReloadEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |event| handler(event).boxed()),
        }
    }
}

#[async_trait]
impl ReloadListener for ClosureListener {
    async fn on_reload(&self, event: &ReloadEvent) -> Result<(), HookError> {
        (self.handler)(event.clone()).await
    }
}

/// Listeners keyed by plugin name.
#[derive(Default)]
struct ListenerSet {
    next_id: AtomicU64,
    by_name: DashMap<String, Vec<(u64, Arc<dyn ReloadListener>)>>,
}

impl ListenerSet {
    fn add(&self, name: &str, listener: Arc<dyn ReloadListener>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.by_name
            .entry(name.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    fn remove(&self, name: &str, id: u64) -> bool {
        let removed = match self.by_name.get_mut(name) {
            Some(mut entries) => {
                let before = entries.len();
                entries.retain(|(entry_id, _)| *entry_id != id);
                entries.len() != before
            }
            None => false,
        };
        self.by_name.remove_if(name, |_, entries| entries.is_empty());
        removed
    }

    fn snapshot(&self, name: &str) -> Vec<Arc<dyn ReloadListener>> {
        self.by_name
            .get(name)
            .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default()
    }

    fn count(&self, name: &str) -> usize {
        self.by_name.get(name).map(|entries| entries.len()).unwrap_or(0)
    }
}

/// Handle returned by `on_hot_reload`; removes its listener on `unsubscribe`.
#[derive(Debug)]
pub struct ReloadSubscription {
    name: String,
    id: u64,
    listeners: Weak<ListenerSet>,
}

impl ReloadSubscription {
    /// Plugin name the listener is attached to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Removes just this listener. Returns whether it was still registered.
    pub fn unsubscribe(self) -> bool {
        self.listeners
            .upgrade()
            .map(|listeners| listeners.remove(&self.name, self.id))
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("names", &self.by_name.len())
            .finish()
    }
}

/// Orchestrates hot reloads on top of the install coordinator.
#[derive(Debug, Clone)]
pub struct HotReloadController {
    coordinator: InstallCoordinator,
    /// Names with a reload in progress.
    reloading: Arc<DashSet<String>>,
    listeners: Arc<ListenerSet>,
}

impl HotReloadController {
    /// Creates a controller sharing the coordinator's registry, graph and locks.
    pub fn new(coordinator: InstallCoordinator) -> Self {
        Self {
            coordinator,
            reloading: Arc::new(DashSet::new()),
            listeners: Arc::new(ListenerSet::default()),
        }
    }

    /// Replaces the installed plugin `name` with `descriptor`.
    ///
    /// If `name` is not installed, `descriptor` is simply installed with the
    /// options last stored for the name. On failure the previous version is
    /// reinstalled; the returned error is always the new version's error.
    ///
    /// Called from a hook that is installing or reloading `name` itself, this
    /// fails with `CircularDependency`.
    pub async fn hot_reload(
        &self,
        name: &str,
        descriptor: Arc<PluginDescriptor>,
    ) -> PluginResult<bool> {
        if descriptor.name() != name {
            return Err(PluginError::NameMismatch {
                expected: name.to_string(),
                actual: descriptor.name().to_string(),
            });
        }

        let mut chain = current_chain();
        if let Some(pos) = chain.iter().position(|n| n == name) {
            let mut path = chain[pos..].to_vec();
            path.push(name.to_string());
            return Err(PluginError::CircularDependency {
                name: name.to_string(),
                path,
            });
        }
        chain.push(name.to_string());

        let Some(marker) = NameMarker::try_mark(&self.reloading, name) else {
            warn!(plugin = %name, "Hot reload rejected, another reload is in progress");
            return Err(PluginError::ConcurrentReload {
                name: name.to_string(),
            });
        };

        let controller = self.clone();
        let task_name = name.to_string();
        let handle = tokio::spawn(with_chain(chain, async move {
            let _reloading = marker;
            controller.reload_exclusive(&task_name, descriptor).await
        }));

        handle.await.unwrap_or_else(|e| {
            Err(PluginError::TaskAborted {
                name: name.to_string(),
                reason: e.to_string(),
            })
        })
    }

    async fn reload_exclusive(
        &self,
        name: &str,
        descriptor: Arc<PluginDescriptor>,
    ) -> PluginResult<bool> {
        let lock = self.coordinator.locks().acquire(name).await;
        let registry = self.coordinator.registry();
        let graph = self.coordinator.graph();
        let options = self.coordinator.stored_options(name);

        let Some(previous) = registry.get(name) else {
            debug!(plugin = %name, "Hot reload of a plugin that is not installed, installing");
            self.coordinator
                .install_locked(&descriptor, options, None)
                .await?;
            return Ok(true);
        };

        self.coordinator.validate(&descriptor)?;

        // Snapshot phase. The graph keeps the edges of both versions until one
        // of them is committed.
        registry.take(name);
        graph.extend(&descriptor);

        let ctx = self.coordinator.context().clone();
        let install_error = {
            let _installing = self.coordinator.mark_installing(name);
            descriptor.invoke_install(&ctx, &options).await.err()
        };

        let Some(install_error) = install_error else {
            self.coordinator.commit(&descriptor, options);

            if let Err(e) = previous.descriptor.invoke_uninstall(&ctx).await {
                warn!(plugin = %name, error = %e, "Previous version failed to uninstall after reload");
            }
            drop(lock);

            info!(
                plugin = %name,
                from = previous.descriptor.version().unwrap_or("-"),
                to = descriptor.version().unwrap_or("-"),
                "Plugin hot reloaded"
            );

            self.notify(ReloadEvent {
                name: name.to_string(),
                previous_version: previous.descriptor.version().map(str::to_string),
                current_version: descriptor.version().map(str::to_string),
                reloaded_at: Utc::now(),
            })
            .await;
            return Ok(true);
        };

        // Compensation phase.
        warn!(plugin = %name, error = %install_error, "New version failed to install, rolling back");
        let cause = Box::new(PluginError::InstallFailed {
            name: name.to_string(),
            source: install_error,
        });

        let missing = graph.check_missing(&previous.descriptor);
        let rollback = if missing.is_empty() {
            let _installing = self.coordinator.mark_installing(name);
            previous.descriptor.invoke_install(&ctx, &options).await
        } else {
            Err(HookError::new(format!(
                "dependencies no longer installed: {}",
                missing.join(", ")
            )))
        };

        match rollback {
            Ok(()) => {
                self.coordinator.commit(&previous.descriptor, options);
                info!(plugin = %name, "Rolled back to previous version");
                Err(PluginError::ReloadFailed {
                    name: name.to_string(),
                    rolled_back: true,
                    source: cause,
                })
            }
            Err(rollback_error) => {
                error!(
                    plugin = %name,
                    error = %rollback_error,
                    "Rollback failed, previous version left in error state"
                );
                registry.register(PluginRecord {
                    descriptor: previous.descriptor.clone(),
                    status: PluginStatus::Error,
                    last_error: Some(rollback_error.to_string()),
                    installed_at: previous.installed_at,
                });
                graph.update(&previous.descriptor);
                Err(PluginError::ReloadFailed {
                    name: name.to_string(),
                    rolled_back: false,
                    source: cause,
                })
            }
        }
    }

    /// Calls every listener for the reloaded plugin; failures are only logged.
    async fn notify(&self, event: ReloadEvent) {
        let listeners = self.listeners.snapshot(&event.name);
        for listener in listeners {
            match AssertUnwindSafe(listener.on_reload(&event))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(plugin = %event.name, error = %e, "Reload listener failed");
                }
                Err(panic) => {
                    warn!(
                        plugin = %event.name,
                        panic = %panic_message(panic.as_ref()),
                        "Reload listener panicked"
                    );
                }
            }
        }
    }

    /// Registers a listener for reloads of `name`.
    pub fn on_hot_reload(&self, name: &str, listener: Arc<dyn ReloadListener>) -> ReloadSubscription {
        let id = self.listeners.add(name, listener);
        ReloadSubscription {
            name: name.to_string(),
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Registers an async closure as a listener for reloads of `name`.
    pub fn on_hot_reload_fn<F, Fut>(&self, name: &str, handler: F) -> ReloadSubscription
    where
        F: Fn(ReloadEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.on_hot_reload(name, Arc::new(ClosureListener::new(handler)))
    }

    /// Number of listeners registered for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.count(name)
    }

    /// Whether `name` is installed and can be cleanly replaced.
    pub fn is_hot_reloadable(&self, name: &str) -> bool {
        self.coordinator
            .registry()
            .get(name)
            .map(|record| record.descriptor.has_uninstall())
            .unwrap_or(false)
    }

    /// Whether a reload of `name` is in progress.
    pub fn is_reloading(&self, name: &str) -> bool {
        self.reloading.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn ReloadListener> {
        Arc::new(ClosureListener::new(|_| async { Ok(()) }))
    }

    #[test]
    fn test_listener_set_removes_only_matching_id() {
        let set = ListenerSet::default();
        let first = set.add("svc", noop());
        let second = set.add("svc", noop());
        set.add("other", noop());

        assert!(set.remove("svc", first));
        assert!(!set.remove("svc", first));
        assert_eq!(set.count("svc"), 1);
        assert_eq!(set.count("other"), 1);

        assert!(set.remove("svc", second));
        assert!(!set.by_name.contains_key("svc"));
    }

    #[test]
    fn test_subscription_outliving_listeners_is_inert() {
        let listeners = Arc::new(ListenerSet::default());
        let id = listeners.add("svc", noop());
        let subscription = ReloadSubscription {
            name: "svc".to_string(),
            id,
            listeners: Arc::downgrade(&listeners),
        };
        drop(listeners);

        assert_eq!(subscription.name(), "svc");
        assert!(!subscription.unsubscribe());
    }
}
