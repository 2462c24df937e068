//! Prelude for convenient imports.

pub use async_trait::async_trait;

pub use crate::context::PluginContext;
pub use crate::descriptor::{InstallHook, PluginDescriptor, PluginOptions, UninstallHook};
pub use crate::error::{HookError, PluginError, PluginResult};
pub use crate::hot_reload::{ReloadEvent, ReloadListener, ReloadSubscription};
pub use crate::manager::PluginManager;
pub use crate::registry::{PluginRecord, PluginStatus};
