//! Shared test helpers for plugin manager integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use modhost_plugin::prelude::*;
use tokio::sync::Notify;

/// Counts hook invocations for one plugin.
#[derive(Debug, Default)]
pub struct HookCount {
    pub installs: AtomicUsize,
    pub uninstalls: AtomicUsize,
}

impl HookCount {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn uninstalls(&self) -> usize {
        self.uninstalls.load(Ordering::SeqCst)
    }
}

/// Builds a descriptor whose hooks succeed after `delay` and report to `hooks`.
pub fn plugin(
    name: &str,
    version: &str,
    deps: &[&str],
    hooks: &Arc<HookCount>,
    delay: Duration,
) -> Arc<PluginDescriptor> {
    let on_install = hooks.clone();
    let on_uninstall = hooks.clone();
    PluginDescriptor::builder(name)
        .version(version)
        .dependencies(deps.iter().copied())
        .install_fn(move |_, _| {
            let hooks = on_install.clone();
            async move {
                hooks.installs.fetch_add(1, Ordering::SeqCst);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(())
            }
        })
        .uninstall_fn(move |_| {
            let hooks = on_uninstall.clone();
            async move {
                hooks.uninstalls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build()
        .expect("descriptor")
}

/// Builds a descriptor with no delay.
pub fn quick(name: &str, deps: &[&str], hooks: &Arc<HookCount>) -> Arc<PluginDescriptor> {
    plugin(name, "1.0.0", deps, hooks, Duration::ZERO)
}

/// Builds a descriptor whose install hook always fails with `message`.
pub fn failing(name: &str, version: &str, message: &str, hooks: &Arc<HookCount>) -> Arc<PluginDescriptor> {
    let on_install = hooks.clone();
    let message = message.to_string();
    PluginDescriptor::builder(name)
        .version(version)
        .install_fn(move |_, _| {
            let hooks = on_install.clone();
            let message = message.clone();
            async move {
                hooks.installs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Err(HookError::new(message))
            }
        })
        .uninstall_fn(|_| async { Ok(()) })
        .build()
        .expect("descriptor")
}

/// Holds an install hook open until the test releases it.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once the gated hook has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lets the gated hook finish.
    pub fn open(&self) {
        self.release.notify_one();
    }
}

/// Builds a descriptor whose install hook waits on `gate`, then succeeds or
/// fails with `error`.
pub fn gated(
    name: &str,
    version: &str,
    deps: &[&str],
    gate: &Gate,
    error: Option<&str>,
    hooks: &Arc<HookCount>,
) -> Arc<PluginDescriptor> {
    let gate = gate.clone();
    let error = error.map(str::to_string);
    let on_install = hooks.clone();
    let on_uninstall = hooks.clone();
    PluginDescriptor::builder(name)
        .version(version)
        .dependencies(deps.iter().copied())
        .install_fn(move |_, _| {
            let gate = gate.clone();
            let error = error.clone();
            let hooks = on_install.clone();
            async move {
                hooks.installs.fetch_add(1, Ordering::SeqCst);
                gate.entered.notify_one();
                gate.release.notified().await;
                match error {
                    Some(message) => Err(HookError::new(message)),
                    None => Ok(()),
                }
            }
        })
        .uninstall_fn(move |_| {
            let hooks = on_uninstall.clone();
            async move {
                hooks.uninstalls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .build()
        .expect("descriptor")
}

/// Waits until `check` holds, failing the test after one second.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
