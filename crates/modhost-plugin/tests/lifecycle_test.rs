//! Install / uninstall behaviour of the plugin manager.

mod helpers;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use modhost_core::config::plugin::PluginConfig;
use modhost_plugin::prelude::*;

use helpers::{Gate, HookCount, eventually, failing, gated, plugin, quick};

#[tokio::test]
async fn test_chain_installs_in_order_and_reports_tree() {
    let manager = PluginManager::default();
    let hooks = HookCount::new();

    manager.use_plugin(quick("A", &[], &hooks), PluginOptions::Null).await.unwrap();
    manager.use_plugin(quick("B", &["A"], &hooks), PluginOptions::Null).await.unwrap();
    manager.use_plugin(quick("C", &["B"], &hooks), PluginOptions::Null).await.unwrap();

    let expected: BTreeMap<String, Vec<String>> = [
        ("C".to_string(), vec!["B".to_string()]),
        ("B".to_string(), vec!["A".to_string()]),
        ("A".to_string(), vec![]),
    ]
    .into_iter()
    .collect();
    assert_eq!(manager.dependency_tree("C"), expected);
    assert_eq!(manager.topological_order(), vec!["A", "B", "C"]);
    assert_eq!(manager.size(), 3);
    assert_eq!(hooks.installs(), 3);
}

#[tokio::test]
async fn test_installing_dependent_first_reports_immediate_missing() {
    let manager = PluginManager::default();
    let hooks = HookCount::new();

    let err = manager
        .use_plugin(quick("C", &["B"], &hooks), PluginOptions::Null)
        .await
        .unwrap_err();

    match err {
        PluginError::MissingDependency { name, missing } => {
            assert_eq!(name, "C");
            assert_eq!(missing, vec!["B".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(hooks.installs(), 0);
    assert!(!manager.has("C"));
}

#[tokio::test]
async fn test_repeated_use_installs_once() {
    let manager = PluginManager::default();
    let hooks = HookCount::new();
    let descriptor = quick("once", &[], &hooks);

    manager.use_plugin(descriptor.clone(), PluginOptions::Null).await.unwrap();
    manager.use_plugin(descriptor.clone(), PluginOptions::Null).await.unwrap();

    let other_hooks = HookCount::new();
    manager
        .use_plugin(quick("once", &[], &other_hooks), PluginOptions::Null)
        .await
        .unwrap();

    assert_eq!(hooks.installs(), 1);
    assert_eq!(other_hooks.installs(), 0);
    assert!(Arc::ptr_eq(&manager.get("once").unwrap(), &descriptor));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_use_invokes_install_once() {
    let manager = PluginManager::default();
    let hooks = HookCount::new();
    let descriptor = plugin("shared", "1.0.0", &[], &hooks, Duration::from_millis(30));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let manager = manager.clone();
        let descriptor = descriptor.clone();
        handles.push(tokio::spawn(async move {
            manager.use_plugin(descriptor, PluginOptions::Null).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(hooks.installs(), 1);
    assert!(manager.has("shared"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failing_use_fails_identically_and_can_retry() {
    let manager = PluginManager::default();
    let hooks = HookCount::new();
    let descriptor = failing("flaky", "1.0.0", "database offline", &hooks);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        let descriptor = descriptor.clone();
        handles.push(tokio::spawn(async move {
            manager.use_plugin(descriptor, PluginOptions::Null).await
        }));
    }

    let mut messages = Vec::new();
    for handle in handles {
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, PluginError::InstallFailed { .. }));
        messages.push(err.to_string());
    }
    assert!(messages.iter().all(|m| m == &messages[0]));
    assert!(messages[0].contains("database offline"));
    assert_eq!(hooks.installs(), 1);
    assert!(!manager.has("flaky"));
    assert_eq!(manager.status("flaky"), None);

    // Nothing was left behind, so a retry with a working version succeeds.
    let fixed = HookCount::new();
    manager.use_plugin(quick("flaky", &[], &fixed), PluginOptions::Null).await.unwrap();
    assert_eq!(fixed.installs(), 1);
}

#[tokio::test]
async fn test_mutual_dependency_is_rejected_before_hooks() {
    let manager = PluginManager::default();
    let count_a = HookCount::new();
    let count_b = HookCount::new();

    let err_a = manager
        .use_plugin(quick("A", &["B"], &count_a), PluginOptions::Null)
        .await
        .unwrap_err();
    let err_b = manager
        .use_plugin(quick("B", &["A"], &count_b), PluginOptions::Null)
        .await
        .unwrap_err();

    for err in [err_a, err_b] {
        assert!(matches!(
            err,
            PluginError::CircularDependency { .. } | PluginError::MissingDependency { .. }
        ));
    }
    assert_eq!(count_a.installs(), 0);
    assert_eq!(count_b.installs(), 0);
    assert_eq!(manager.size(), 0);
}

#[tokio::test]
async fn test_self_dependency_is_circular() {
    let manager = PluginManager::default();
    let hooks = HookCount::new();

    let err = manager
        .use_plugin(quick("ouroboros", &["ouroboros"], &hooks), PluginOptions::Null)
        .await
        .unwrap_err();
    match err {
        PluginError::CircularDependency { path, .. } => {
            assert_eq!(path, vec!["ouroboros", "ouroboros"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(hooks.installs(), 0);
}

#[tokio::test]
async fn test_uninstall_blocked_by_dependents_until_they_are_removed() {
    let manager = PluginManager::default();
    let hooks = HookCount::new();
    manager.use_plugin(quick("core", &[], &hooks), PluginOptions::Null).await.unwrap();
    manager.use_plugin(quick("ui", &["core"], &hooks), PluginOptions::Null).await.unwrap();

    let err = manager.uninstall("core", false).await.unwrap_err();
    match err {
        PluginError::HasDependents { name, dependents } => {
            assert_eq!(name, "core");
            assert_eq!(dependents, vec!["ui".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(manager.has("core"));
    assert_eq!(hooks.uninstalls(), 0);

    assert!(manager.uninstall("ui", false).await.unwrap());
    assert!(manager.uninstall("core", false).await.unwrap());
    assert_eq!(hooks.uninstalls(), 2);
    assert_eq!(manager.size(), 0);
    assert!(manager.topological_order().is_empty());
}

#[tokio::test]
async fn test_uninstall_unknown_returns_false() {
    let manager = PluginManager::default();
    assert!(!manager.uninstall("ghost", false).await.unwrap());
}

#[tokio::test]
async fn test_clear_skips_uninstall_hooks() {
    let manager = PluginManager::default();
    let hooks = HookCount::new();
    manager.use_plugin(quick("a", &[], &hooks), PluginOptions::Null).await.unwrap();
    manager.use_plugin(quick("b", &["a"], &hooks), PluginOptions::Null).await.unwrap();
    assert_eq!(manager.get_all().len(), 2);

    manager.clear();
    assert_eq!(manager.size(), 0);
    assert!(manager.dependents("a").is_empty());
    assert_eq!(hooks.uninstalls(), 0);

    // Installing again after a clear runs the hooks again.
    manager.use_plugin(quick("a", &[], &hooks), PluginOptions::Null).await.unwrap();
    assert_eq!(hooks.installs(), 3);
}

#[tokio::test]
async fn test_reentrant_use_from_hook_is_circular_not_deadlock() {
    let manager = PluginManager::default();
    let nested: Arc<Mutex<Option<PluginError>>> = Arc::new(Mutex::new(None));

    let inner_manager = manager.clone();
    let sink = nested.clone();
    let outer = PluginDescriptor::builder("outer")
        .install_fn(move |_, _| {
            let manager = inner_manager.clone();
            let sink = sink.clone();
            async move {
                let again = PluginDescriptor::builder("outer")
                    .install_fn(|_, _| async { Ok(()) })
                    .build()
                    .map_err(|e| HookError::new(e.to_string()))?;
                if let Err(e) = manager.use_plugin(again, PluginOptions::Null).await {
                    *sink.lock().unwrap() = Some(e);
                }
                Ok(())
            }
        })
        .build()
        .unwrap();

    tokio::time::timeout(
        Duration::from_secs(2),
        manager.use_plugin(outer, PluginOptions::Null),
    )
    .await
    .expect("re-entrant install must not deadlock")
    .unwrap();

    let err = nested.lock().unwrap().take().expect("nested install error");
    match err {
        PluginError::CircularDependency { path, .. } => assert_eq!(path, vec!["outer", "outer"]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(manager.has("outer"));
}

#[tokio::test]
async fn test_hook_installing_mutual_dependent_is_circular() {
    let manager = PluginManager::default();
    let nested: Arc<Mutex<Option<PluginError>>> = Arc::new(Mutex::new(None));

    // `alpha`'s hook installs `beta`, whose hook tries to install `alpha`.
    let beta_manager = manager.clone();
    let sink = nested.clone();
    let beta = PluginDescriptor::builder("beta")
        .install_fn(move |_, _| {
            let manager = beta_manager.clone();
            let sink = sink.clone();
            async move {
                let alpha_again = PluginDescriptor::builder("alpha")
                    .install_fn(|_, _| async { Ok(()) })
                    .build()
                    .map_err(|e| HookError::new(e.to_string()))?;
                if let Err(e) = manager.use_plugin(alpha_again, PluginOptions::Null).await {
                    *sink.lock().unwrap() = Some(e);
                }
                Ok(())
            }
        })
        .build()
        .unwrap();

    let alpha_manager = manager.clone();
    let alpha = PluginDescriptor::builder("alpha")
        .install_fn(move |_, _| {
            let manager = alpha_manager.clone();
            let beta = beta.clone();
            async move {
                manager
                    .use_plugin(beta, PluginOptions::Null)
                    .await
                    .map_err(|e| HookError::new(e.to_string()))
            }
        })
        .build()
        .unwrap();

    tokio::time::timeout(
        Duration::from_secs(2),
        manager.use_plugin(alpha, PluginOptions::Null),
    )
    .await
    .expect("nested installs must not deadlock")
    .unwrap();

    let err = nested.lock().unwrap().take().expect("nested install error");
    match err {
        PluginError::CircularDependency { path, .. } => {
            assert_eq!(path, vec!["alpha", "beta", "alpha"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(manager.has("alpha"));
    assert!(manager.has("beta"));
}

#[tokio::test]
async fn test_install_completes_after_caller_gives_up() {
    let manager = PluginManager::default();
    let hooks = HookCount::new();
    let slow = plugin("slow", "1.0.0", &[], &hooks, Duration::from_millis(50));

    let attempt = tokio::time::timeout(
        Duration::from_millis(5),
        manager.use_plugin(slow, PluginOptions::Null),
    )
    .await;
    assert!(attempt.is_err());
    assert_eq!(manager.status("slow"), Some(PluginStatus::Installing));

    eventually(|| manager.has("slow")).await;
    assert_eq!(manager.status("slow"), Some(PluginStatus::Installed));
    assert_eq!(hooks.installs(), 1);
}

#[tokio::test]
async fn test_panicking_hook_reports_failure_and_releases_name() {
    let manager = PluginManager::default();
    let panicked = Arc::new(AtomicBool::new(false));
    let flag = panicked.clone();
    let descriptor = PluginDescriptor::builder("volatile")
        .install_fn(move |_, _| {
            let flag = flag.clone();
            async move {
                if !flag.swap(true, Ordering::SeqCst) {
                    panic!("first install explodes");
                }
                Ok(())
            }
        })
        .build()
        .unwrap();

    let err = manager
        .use_plugin(descriptor.clone(), PluginOptions::Null)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("first install explodes"));
    assert!(panicked.load(Ordering::SeqCst));

    manager.use_plugin(descriptor, PluginOptions::Null).await.unwrap();
    assert!(manager.has("volatile"));
}

#[tokio::test]
async fn test_empty_names_follow_configuration() {
    let hooks = HookCount::new();

    let lenient = PluginManager::default();
    lenient.use_plugin(quick("", &[], &hooks), PluginOptions::Null).await.unwrap();
    assert!(lenient.has(""));

    let config = PluginConfig {
        allow_empty_names: false,
        ..PluginConfig::default()
    };
    let strict = PluginManager::with_config(PluginContext::new(), &config);
    let err = strict
        .use_plugin(quick("", &[], &hooks), PluginOptions::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::InvalidName { .. }));
    assert_eq!(hooks.installs(), 1);
}

#[tokio::test]
async fn test_uninstall_waits_for_in_flight_install() {
    let manager = PluginManager::default();
    let hooks = HookCount::new();
    let gate = Gate::new();

    let install = {
        let manager = manager.clone();
        let descriptor = gated("db", "1.0.0", &[], &gate, None, &hooks);
        tokio::spawn(async move { manager.use_plugin(descriptor, PluginOptions::Null).await })
    };
    gate.entered().await;

    let uninstall = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.uninstall("db", false).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!uninstall.is_finished());
    assert_eq!(hooks.uninstalls(), 0);

    gate.open();
    install.await.unwrap().unwrap();
    assert!(uninstall.await.unwrap().unwrap());

    assert_eq!(hooks.installs(), 1);
    assert_eq!(hooks.uninstalls(), 1);
    assert!(!manager.has("db"));
}
