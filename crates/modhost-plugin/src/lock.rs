//! Per-name install locks and name markers.
//!
//! Every install, uninstall and hot reload holds the lock for its plugin
//! name for its whole duration. Locks are created on demand and the map
//! entry is dropped once nobody holds or waits on it.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Map from plugin name to its async mutex.
#[derive(Debug, Default)]
pub struct NameLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl NameLocks {
    /// Creates an empty lock map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the lock for `name` is free and takes it.
    pub async fn acquire(&self, name: &str) -> NameLockGuard {
        let mutex = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;
        debug!(plugin = %name, "Name lock acquired");

        NameLockGuard {
            name: name.to_string(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Returns whether the lock for `name` is currently held.
    pub fn is_locked(&self, name: &str) -> bool {
        self.locks
            .get(name)
            .map(|mutex| mutex.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of names with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns whether no lock entries exist.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Holds the lock for one plugin name; releases it on drop.
#[derive(Debug)]
pub struct NameLockGuard {
    name: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl NameLockGuard {
    /// Plugin name this guard locks.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NameLockGuard {
    fn drop(&mut self) {
        // Release first, then drop the entry if only the map still refers to it.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.name, |_, mutex| Arc::strong_count(mutex) == 1);
        debug!(plugin = %self.name, "Name lock released");
    }
}

/// Membership of a name in a marker set, removed on drop.
///
/// Used for the "installing" and "reloading" markers, which must be cleared
/// on every exit path.
#[derive(Debug)]
pub struct NameMarker {
    name: String,
    set: Arc<DashSet<String>>,
}

impl NameMarker {
    /// Marks `name` in `set`. Returns `None` if it was already marked.
    pub fn try_mark(set: &Arc<DashSet<String>>, name: &str) -> Option<Self> {
        set.insert(name.to_string()).then(|| Self {
            name: name.to_string(),
            set: set.clone(),
        })
    }
}

impl Drop for NameMarker {
    fn drop(&mut self) {
        self.set.remove(&self.name);
    }
}
