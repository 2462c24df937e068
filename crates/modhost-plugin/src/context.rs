//! Plugin context: engine services handed to install and uninstall hooks.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

type Service = Arc<dyn Any + Send + Sync>;

/// Opaque bag of engine services passed to plugin hooks.
///
/// The manager never inspects the services; it only passes the context
/// through. Cloning is cheap since services are reference counted.
#[derive(Clone, Default)]
pub struct PluginContext {
    /// Service name → service instance.
    services: HashMap<String, Service>,
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.services.keys().collect();
        keys.sort();
        f.debug_struct("PluginContext")
            .field("services", &keys)
            .finish()
    }
}

impl PluginContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service under `key`, replacing any previous one.
    pub fn with_service<T>(mut self, key: impl Into<String>, service: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.insert(key, service);
        self
    }

    /// Inserts a service under `key`, replacing any previous one.
    pub fn insert<T>(&mut self, key: impl Into<String>, service: T)
    where
        T: Any + Send + Sync,
    {
        self.services.insert(key.into(), Arc::new(service));
    }

    /// Returns the service stored under `key` if it has type `T`.
    pub fn get<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.services
            .get(key)
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// Returns whether a service is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.services.contains_key(key)
    }

    /// Returns the number of services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns whether the context holds no services.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Shallow merge: services in `overrides` replace same-named services of
    /// `self`, every other service is kept.
    pub fn merged(&self, overrides: &PluginContext) -> PluginContext {
        let mut services = self.services.clone();
        for (key, service) in &overrides.services {
            services.insert(key.clone(), service.clone());
        }
        PluginContext { services }
    }
}
