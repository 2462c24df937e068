//! Plugin registry: stores installed plugin records and their status.
//!
//! The registry is a plain data container: it performs no validation and
//! has no notion of dependencies. Callers that mutate it hold the plugin's
//! name lock; reads are safe at any time.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::PluginDescriptor;

/// Lifecycle status of a plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    /// An install was requested and is waiting for the name lock.
    Pending,
    /// The install hook is running.
    Installing,
    /// Installed and live.
    Installed,
    /// The uninstall hook is running.
    Uninstalling,
    /// A hot reload failed and the previous version could not be restored.
    Error,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Installing => write!(f, "installing"),
            Self::Installed => write!(f, "installed"),
            Self::Uninstalling => write!(f, "uninstalling"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Registry entry for one plugin.
#[derive(Debug, Clone)]
pub struct PluginRecord {
    /// The descriptor supplied by the host.
    pub descriptor: Arc<PluginDescriptor>,
    /// Current status.
    pub status: PluginStatus,
    /// Most recent hook error, if any.
    pub last_error: Option<String>,
    /// When the current descriptor finished installing.
    pub installed_at: DateTime<Utc>,
}

impl PluginRecord {
    /// Creates a record for a freshly installed descriptor.
    pub fn installed(descriptor: Arc<PluginDescriptor>) -> Self {
        Self {
            descriptor,
            status: PluginStatus::Installed,
            last_error: None,
            installed_at: Utc::now(),
        }
    }

    /// Plugin name.
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }
}

/// Registry of installed plugins keyed by name.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    /// Plugin name → record.
    records: DashMap<String, PluginRecord>,
}

impl PluginRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record, returning the one it replaced.
    pub fn register(&self, record: PluginRecord) -> Option<PluginRecord> {
        let name = record.name().to_string();
        debug!(plugin = %name, status = %record.status, "Registry insert");
        self.records.insert(name, record)
    }

    /// Returns a snapshot of the record for `name`.
    pub fn get(&self, name: &str) -> Option<PluginRecord> {
        self.records.get(name).map(|entry| entry.value().clone())
    }

    /// Returns whether a record exists for `name`.
    pub fn has(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Removes the record for `name`. Returns whether one existed.
    pub fn remove(&self, name: &str) -> bool {
        self.take(name).is_some()
    }

    /// Removes and returns the record for `name`.
    pub fn take(&self, name: &str) -> Option<PluginRecord> {
        let removed = self.records.remove(name).map(|(_, record)| record);
        if removed.is_some() {
            debug!(plugin = %name, "Registry remove");
        }
        removed
    }

    /// Updates status and last error of an existing record.
    pub fn set_status(&self, name: &str, status: PluginStatus, last_error: Option<String>) -> bool {
        match self.records.get_mut(name) {
            Some(mut entry) => {
                entry.status = status;
                entry.last_error = last_error;
                true
            }
            None => false,
        }
    }

    /// Returns all records, oldest install first.
    pub fn all(&self) -> Vec<PluginRecord> {
        let mut records: Vec<PluginRecord> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| {
            a.installed_at
                .cmp(&b.installed_at)
                .then_with(|| a.name().cmp(b.name()))
        });
        records
    }

    /// Returns the record count.
    pub fn size(&self) -> usize {
        self.records.len()
    }

    /// Drops every record without running any uninstall hook.
    pub fn clear(&self) {
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str) -> Arc<PluginDescriptor> {
        PluginDescriptor::builder(name)
            .install_fn(|_, _| async { Ok(()) })
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_get_remove() {
        let registry = PluginRegistry::new();
        assert!(registry.register(PluginRecord::installed(descriptor("a"))).is_none());
        assert!(registry.has("a"));
        assert_eq!(registry.size(), 1);
        assert_eq!(registry.get("a").unwrap().status, PluginStatus::Installed);

        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert!(registry.get("a").is_none());
    }

    #[test]
    fn test_register_replaces_existing() {
        let registry = PluginRegistry::new();
        let first = descriptor("a");
        let second = descriptor("a");
        registry.register(PluginRecord::installed(first.clone()));
        let replaced = registry.register(PluginRecord::installed(second.clone())).unwrap();
        assert!(Arc::ptr_eq(&replaced.descriptor, &first));
        assert!(Arc::ptr_eq(&registry.get("a").unwrap().descriptor, &second));
        assert_eq!(registry.size(), 1);
    }

    #[test]
    fn test_set_status_and_clear() {
        let registry = PluginRegistry::new();
        registry.register(PluginRecord::installed(descriptor("a")));
        registry.register(PluginRecord::installed(descriptor("b")));

        assert!(registry.set_status("a", PluginStatus::Error, Some("broken".into())));
        assert!(!registry.set_status("zzz", PluginStatus::Error, None));
        let record = registry.get("a").unwrap();
        assert_eq!(record.status, PluginStatus::Error);
        assert_eq!(record.last_error.as_deref(), Some("broken"));

        assert_eq!(registry.all().len(), 2);
        registry.clear();
        assert_eq!(registry.size(), 0);
        assert!(registry.all().is_empty());
    }
}
