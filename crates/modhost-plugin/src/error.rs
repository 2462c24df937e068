//! Typed errors for the plugin lifecycle manager.
//!
//! [`PluginError`] is `Clone` so that the single outcome of an in-flight
//! install can be handed to every caller waiting on it.

use std::sync::Arc;

use thiserror::Error;

use modhost_core::error::{AppError, ErrorKind};

/// Result alias for plugin manager operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Error returned by a plugin's install or uninstall hook.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HookError {
    /// Human-readable failure description.
    pub message: String,
    /// Optional underlying cause, shared so the error stays cloneable.
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl HookError {
    /// Creates a hook error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a hook error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }
}

impl From<String> for HookError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Errors that can occur during plugin lifecycle operations.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PluginError {
    /// Installing the plugin would close a dependency cycle.
    #[error("Circular dependency detected for plugin '{name}': {}", path.join(" -> "))]
    CircularDependency {
        /// Plugin being installed.
        name: String,
        /// The cycle, starting and ending with the same plugin.
        path: Vec<String>,
    },

    /// One or more immediate dependencies are not installed.
    #[error("Plugin '{name}' is missing dependencies: {}", missing.join(", "))]
    MissingDependency {
        /// Plugin being installed.
        name: String,
        /// Declared dependencies that are not installed.
        missing: Vec<String>,
    },

    /// The plugin's install hook failed. The plugin was not registered.
    #[error("Plugin '{name}' install failed: {source}")]
    InstallFailed {
        /// Plugin being installed.
        name: String,
        /// Error returned by the hook.
        #[source]
        source: HookError,
    },

    /// Other installed plugins depend on the plugin being uninstalled.
    #[error("Plugin '{name}' is required by: {}", dependents.join(", "))]
    HasDependents {
        /// Plugin being uninstalled.
        name: String,
        /// Installed plugins that declare it as a dependency.
        dependents: Vec<String>,
    },

    /// The plugin's uninstall hook failed. The plugin remains installed.
    #[error("Plugin '{name}' uninstall failed: {source}")]
    UninstallFailed {
        /// Plugin being uninstalled.
        name: String,
        /// Error returned by the hook.
        #[source]
        source: HookError,
    },

    /// A hot reload is already running for this plugin.
    #[error("Plugin '{name}' is already being reloaded")]
    ConcurrentReload {
        /// Plugin being reloaded.
        name: String,
    },

    /// The replacement version failed to install during a hot reload.
    ///
    /// `source` is always the replacement's error, even when the rollback
    /// to the previous version failed as well.
    #[error("Plugin '{name}' reload failed (rolled back: {rolled_back}): {source}")]
    ReloadFailed {
        /// Plugin being reloaded.
        name: String,
        /// Whether the previous version was reinstalled successfully.
        rolled_back: bool,
        /// Why the replacement could not be installed.
        #[source]
        source: Box<PluginError>,
    },

    /// A hot reload was requested with a descriptor for a different name.
    #[error("Reload target '{expected}' does not match descriptor name '{actual}'")]
    NameMismatch {
        /// Name passed to the reload call.
        expected: String,
        /// Name carried by the new descriptor.
        actual: String,
    },

    /// The plugin name was rejected by configuration.
    #[error("Invalid plugin name '{name}'")]
    InvalidName {
        /// The rejected name.
        name: String,
    },

    /// A descriptor was built without an install hook.
    #[error("Plugin '{name}' has no install hook")]
    MissingInstallHook {
        /// Plugin whose descriptor is incomplete.
        name: String,
    },

    /// The task running the operation was cancelled before it finished.
    #[error("Operation on plugin '{name}' was aborted: {reason}")]
    TaskAborted {
        /// Plugin the operation was acting on.
        name: String,
        /// Cancellation cause reported by the runtime.
        reason: String,
    },
}

impl PluginError {
    /// Returns a stable code identifying the error variant.
    pub fn kind_code(&self) -> &'static str {
        match self {
            Self::CircularDependency { .. } => "CIRCULAR_DEPENDENCY",
            Self::MissingDependency { .. } => "MISSING_DEPENDENCY",
            Self::InstallFailed { .. } => "INSTALL_FAILURE",
            Self::HasDependents { .. } => "HAS_DEPENDENTS",
            Self::UninstallFailed { .. } => "UNINSTALL_FAILURE",
            Self::ConcurrentReload { .. } => "CONCURRENT_RELOAD_REJECTED",
            Self::ReloadFailed { .. } => "RELOAD_FAILURE",
            Self::NameMismatch { .. } => "NAME_MISMATCH",
            Self::InvalidName { .. } => "INVALID_NAME",
            Self::MissingInstallHook { .. } => "MISSING_INSTALL_HOOK",
            Self::TaskAborted { .. } => "TASK_ABORTED",
        }
    }

    /// Name of the plugin the error refers to.
    pub fn plugin_name(&self) -> &str {
        match self {
            Self::CircularDependency { name, .. }
            | Self::MissingDependency { name, .. }
            | Self::InstallFailed { name, .. }
            | Self::HasDependents { name, .. }
            | Self::UninstallFailed { name, .. }
            | Self::ConcurrentReload { name }
            | Self::ReloadFailed { name, .. }
            | Self::InvalidName { name }
            | Self::MissingInstallHook { name }
            | Self::TaskAborted { name, .. } => name,
            Self::NameMismatch { expected, .. } => expected,
        }
    }
}

impl From<PluginError> for AppError {
    fn from(err: PluginError) -> Self {
        let kind = match &err {
            PluginError::HasDependents { .. } | PluginError::ConcurrentReload { .. } => {
                ErrorKind::Conflict
            }
            PluginError::NameMismatch { .. }
            | PluginError::InvalidName { .. }
            | PluginError::MissingInstallHook { .. } => ErrorKind::Validation,
            _ => ErrorKind::Plugin,
        };
        AppError::with_source(kind, err.to_string(), err)
    }
}
