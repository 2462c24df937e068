//! Plugin descriptors: the immutable description of a plugin supplied by the host.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::context::PluginContext;
use crate::error::{HookError, PluginError, PluginResult};

/// Per-plugin options passed to the install hook.
pub type PluginOptions = serde_json::Value;

/// Install capability of a plugin.
#[async_trait]
pub trait InstallHook: Send + Sync {
    /// Installs the plugin into the engine.
    async fn install(&self, ctx: &PluginContext, options: &PluginOptions) -> Result<(), HookError>;
}

/// Optional uninstall capability of a plugin.
#[async_trait]
pub trait UninstallHook: Send + Sync {
    /// Removes everything the plugin installed.
    async fn uninstall(&self, ctx: &PluginContext) -> Result<(), HookError>;
}

type InstallFn =
    Arc<dyn Fn(PluginContext, PluginOptions) -> BoxFuture<'static, Result<(), HookError>> + Send + Sync>;
type UninstallFn = Arc<dyn Fn(PluginContext) -> BoxFuture<'static, Result<(), HookError>> + Send + Sync>;

/// A closure-based install hook.
struct ClosureInstall {
    handler: InstallFn,
}

#[async_trait]
impl InstallHook for ClosureInstall {
    async fn install(&self, ctx: &PluginContext, options: &PluginOptions) -> Result<(), HookError> {
        (self.handler)(ctx.clone(), options.clone()).await
    }
}

/// A closure-based uninstall hook.
struct ClosureUninstall {
    handler: UninstallFn,
}

#[async_trait]
impl UninstallHook for ClosureUninstall {
    async fn uninstall(&self, ctx: &PluginContext) -> Result<(), HookError> {
        (self.handler)(ctx.clone()).await
    }
}

/// Immutable description of a plugin.
///
/// Descriptors are shared as `Arc<PluginDescriptor>`; the registry stores
/// the same reference the caller supplied, so identity can be checked with
/// [`Arc::ptr_eq`].
pub struct PluginDescriptor {
    /// Unique plugin name.
    name: String,
    /// Optional version string.
    version: Option<String>,
    /// Declared dependencies, in declaration order (may contain duplicates).
    dependencies: Vec<String>,
    /// Install capability.
    install: Arc<dyn InstallHook>,
    /// Uninstall capability, if the plugin supports removal.
    uninstall: Option<Arc<dyn UninstallHook>>,
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("dependencies", &self.dependencies)
            .field("uninstall", &self.uninstall.is_some())
            .finish()
    }
}

impl PluginDescriptor {
    /// Starts building a descriptor for `name`.
    pub fn builder(name: impl Into<String>) -> PluginDescriptorBuilder {
        PluginDescriptorBuilder {
            name: name.into(),
            version: None,
            dependencies: Vec::new(),
            install: None,
            uninstall: None,
        }
    }

    /// Plugin name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugin version, if declared.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Declared dependencies exactly as supplied.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Declared dependencies with duplicates removed, first occurrence wins.
    pub fn unique_dependencies(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        self.dependencies
            .iter()
            .map(String::as_str)
            .filter(|dep| seen.insert(*dep))
            .collect()
    }

    /// Whether the plugin provides an uninstall hook.
    pub fn has_uninstall(&self) -> bool {
        self.uninstall.is_some()
    }

    /// Runs the install hook, reporting a panic as a hook error.
    pub(crate) async fn invoke_install(
        &self,
        ctx: &PluginContext,
        options: &PluginOptions,
    ) -> Result<(), HookError> {
        match AssertUnwindSafe(self.install.install(ctx, options))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(HookError::new(format!(
                "install hook panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    /// Runs the uninstall hook if present, reporting a panic as a hook error.
    pub(crate) async fn invoke_uninstall(&self, ctx: &PluginContext) -> Result<(), HookError> {
        let Some(hook) = &self.uninstall else {
            return Ok(());
        };
        match AssertUnwindSafe(hook.uninstall(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(HookError::new(format!(
                "uninstall hook panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Builder for [`PluginDescriptor`].
pub struct PluginDescriptorBuilder {
    name: String,
    version: Option<String>,
    dependencies: Vec<String>,
    install: Option<Arc<dyn InstallHook>>,
    uninstall: Option<Arc<dyn UninstallHook>>,
}

impl PluginDescriptorBuilder {
    /// Sets the version string.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Appends one dependency.
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    /// Appends several dependencies.
    pub fn dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }

    /// Sets the install hook.
    pub fn install(mut self, hook: Arc<dyn InstallHook>) -> Self {
        self.install = Some(hook);
        self
    }

    /// Sets the install hook from an async closure.
    pub fn install_fn<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(PluginContext, PluginOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        let hook = ClosureInstall {
            handler: Arc::new(move |ctx, options| handler(ctx, options).boxed()),
        };
        self.install(Arc::new(hook))
    }

    /// Sets the uninstall hook.
    pub fn uninstall(mut self, hook: Arc<dyn UninstallHook>) -> Self {
        self.uninstall = Some(hook);
        self
    }

    /// Sets the uninstall hook from an async closure.
    pub fn uninstall_fn<F, Fut>(self, handler: F) -> Self
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        let hook = ClosureUninstall {
            handler: Arc::new(move |ctx| handler(ctx).boxed()),
        };
        self.uninstall(Arc::new(hook))
    }

    /// Finishes the descriptor. Fails if no install hook was supplied.
    pub fn build(self) -> PluginResult<Arc<PluginDescriptor>> {
        let install = self
            .install
            .ok_or_else(|| PluginError::MissingInstallHook {
                name: self.name.clone(),
            })?;

        Ok(Arc::new(PluginDescriptor {
            name: self.name,
            version: self.version,
            dependencies: self.dependencies,
            install,
            uninstall: self.uninstall,
        }))
    }
}
