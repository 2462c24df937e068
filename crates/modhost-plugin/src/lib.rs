//! # modhost-plugin
//!
//! Plugin lifecycle manager for modhost. Provides:
//!
//! - A registry of installed plugin records and their status
//! - A dependency graph with cycle detection and a hash-gated topological order cache
//! - Per-name install locks with in-flight de-duplication of concurrent installs
//! - Hot reload with rollback to the previous version and reload listeners
//!
//! Plugins are in-process values described by a [`PluginDescriptor`]; the
//! manager never discovers or loads code on its own.

pub mod context;
pub mod coordinator;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod hot_reload;
pub mod lock;
pub mod manager;
pub mod prelude;
pub mod registry;

pub use context::PluginContext;
pub use descriptor::{InstallHook, PluginDescriptor, PluginOptions, UninstallHook};
pub use error::{HookError, PluginError, PluginResult};
pub use graph::{CacheStats, DependencyGraph};
pub use hot_reload::{ReloadEvent, ReloadListener, ReloadSubscription};
pub use manager::PluginManager;
pub use registry::{PluginRecord, PluginRegistry, PluginStatus};
