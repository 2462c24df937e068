//! Dependency graph: forward/reverse adjacency over installed plugins.
//!
//! The graph is derived from registered plugins only. It answers
//! "what is missing", "who depends on me" and "in which order can these be
//! loaded", and rejects cycles before any install hook runs.
//!
//! The topological order is memoized behind a structural hash: sorted node
//! names, each followed by its sorted dependencies. A lookup recomputes the
//! order only when that hash differs from the one the cache was built for.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::debug;

use crate::descriptor::PluginDescriptor;
use crate::registry::{PluginRegistry, PluginStatus};

/// Topological order cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that recomputed the order.
    pub misses: u64,
}

/// Cached topological order and the structural hash it was computed for.
#[derive(Debug)]
struct OrderCache {
    hash: u64,
    order: Vec<String>,
}

#[derive(Debug, Default)]
struct GraphState {
    /// Plugin → its dependencies.
    forward: BTreeMap<String, BTreeSet<String>>,
    /// Plugin → plugins that depend on it.
    reverse: BTreeMap<String, BTreeSet<String>>,
    cache: Option<OrderCache>,
}

impl GraphState {
    fn structural_hash(&self) -> u64 {
        let mut signature = String::new();
        for (name, deps) in &self.forward {
            signature.push_str(name);
            signature.push(':');
            for dep in deps {
                signature.push_str(dep);
                signature.push(',');
            }
            signature.push(';');
        }
        let mut hasher = DefaultHasher::new();
        signature.hash(&mut hasher);
        hasher.finish()
    }

    fn compute_order(&self) -> Vec<String> {
        let mut order = Vec::with_capacity(self.forward.len());
        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();
        for name in self.forward.keys() {
            self.order_visit(name, &mut visiting, &mut visited, &mut order);
        }
        order
    }

    fn order_visit<'a>(
        &'a self,
        name: &'a str,
        visiting: &mut HashSet<&'a str>,
        visited: &mut HashSet<&'a str>,
        order: &mut Vec<String>,
    ) {
        if visited.contains(name) || !visiting.insert(name) {
            return;
        }
        if let Some(deps) = self.forward.get(name) {
            for dep in deps {
                // Edges left behind by a forced uninstall point at no node.
                if self.forward.contains_key(dep.as_str()) {
                    self.order_visit(dep, visiting, visited, order);
                }
            }
        }
        visiting.remove(name);
        visited.insert(name);
        order.push(name.to_string());
    }
}

/// Depth-first search for a cycle reachable from `start`.
///
/// `visiting` holds the nodes of the current DFS stack (kept in order in
/// `stack`), `visited` the fully processed ones. Reaching a node that is
/// still visiting closes a cycle; the returned path starts and ends with it.
fn find_cycle<F>(start: &str, edges: &F) -> Option<Vec<String>>
where
    F: Fn(&str) -> Vec<String>,
{
    fn visit<F>(
        node: &str,
        edges: &F,
        stack: &mut Vec<String>,
        visiting: &mut HashSet<String>,
        visited: &mut HashSet<String>,
    ) -> Option<Vec<String>>
    where
        F: Fn(&str) -> Vec<String>,
    {
        if visiting.contains(node) {
            let from = stack.iter().position(|n| n == node).unwrap_or(0);
            let mut path = stack[from..].to_vec();
            path.push(node.to_string());
            return Some(path);
        }
        if visited.contains(node) {
            return None;
        }

        visiting.insert(node.to_string());
        stack.push(node.to_string());
        for dep in edges(node) {
            if let Some(cycle) = visit(&dep, edges, stack, visiting, visited) {
                return Some(cycle);
            }
        }
        stack.pop();
        visiting.remove(node);
        visited.insert(node.to_string());
        None
    }

    let mut stack = Vec::new();
    let mut visiting = HashSet::new();
    let mut visited = HashSet::new();
    visit(start, edges, &mut stack, &mut visiting, &mut visited)
}

/// Dependency graph over the plugins currently in the registry.
#[derive(Debug)]
pub struct DependencyGraph {
    /// Registry used to decide whether a dependency is installed.
    registry: Arc<PluginRegistry>,
    state: RwLock<GraphState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DependencyGraph {
    /// Creates an empty graph backed by `registry`.
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            state: RwLock::new(GraphState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns declared dependencies that are not currently installed.
    ///
    /// Only immediate dependencies are checked. Duplicates are reported once,
    /// in declaration order.
    pub fn check_missing(&self, descriptor: &PluginDescriptor) -> Vec<String> {
        descriptor
            .unique_dependencies()
            .into_iter()
            .filter(|dep| {
                self.registry
                    .get(dep)
                    .map(|record| record.status != PluginStatus::Installed)
                    .unwrap_or(true)
            })
            .map(str::to_string)
            .collect()
    }

    /// Inserts or refreshes the edges of an installed plugin.
    pub fn update(&self, descriptor: &PluginDescriptor) {
        let name = descriptor.name().to_string();
        let deps: BTreeSet<String> = descriptor
            .unique_dependencies()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut state = self.write();
        if let Some(previous) = state.forward.remove(&name) {
            for dep in previous.difference(&deps) {
                remove_edge(&mut state.reverse, dep, &name);
            }
        }
        for dep in &deps {
            state
                .reverse
                .entry(dep.clone())
                .or_default()
                .insert(name.clone());
        }
        debug!(plugin = %name, dependencies = deps.len(), "Dependency graph updated");
        state.forward.insert(name, deps);
    }

    /// Adds `descriptor`'s edges to those already recorded for its name.
    ///
    /// Used while a replacement version installs, so the dependencies of both
    /// versions stay protected. A later `update` drops whichever edges the
    /// winning version does not declare.
    pub fn extend(&self, descriptor: &PluginDescriptor) {
        let name = descriptor.name().to_string();
        let mut state = self.write();
        for dep in descriptor.unique_dependencies() {
            state
                .forward
                .entry(name.clone())
                .or_default()
                .insert(dep.to_string());
            state
                .reverse
                .entry(dep.to_string())
                .or_default()
                .insert(name.clone());
        }
        debug!(plugin = %name, "Dependency edges extended");
    }

    /// Drops a plugin's forward edges and scrubs it from its dependencies'
    /// reverse sets. The plugin's own dependents are kept.
    pub fn remove(&self, name: &str) {
        let mut state = self.write();
        if let Some(deps) = state.forward.remove(name) {
            for dep in &deps {
                remove_edge(&mut state.reverse, dep, name);
            }
            debug!(plugin = %name, "Removed from dependency graph");
        }
    }

    /// Drops every node and edge. Cache counters are kept.
    pub fn clear(&self) {
        let mut state = self.write();
        state.forward.clear();
        state.reverse.clear();
        state.cache = None;
    }

    /// Installed plugins that declare `name` as a dependency.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.read()
            .reverse
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Dependencies recorded for an installed plugin.
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        self.read()
            .forward
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Looks for a cycle reachable from `start` in the current graph.
    pub fn detect_cycle(&self, start: &str) -> Option<Vec<String>> {
        let state = self.read();
        let edges = |node: &str| -> Vec<String> {
            state
                .forward
                .get(node)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()
        };
        find_cycle(start, &edges)
    }

    /// Looks for a cycle that installing `descriptor` would close, with the
    /// descriptor's edges standing in for any current edges of its name.
    pub fn detect_cycle_for(&self, descriptor: &PluginDescriptor) -> Option<Vec<String>> {
        let state = self.read();
        let edges = |node: &str| -> Vec<String> {
            if node == descriptor.name() {
                descriptor
                    .unique_dependencies()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            } else {
                state
                    .forward
                    .get(node)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default()
            }
        };
        find_cycle(descriptor.name(), &edges)
    }

    /// Returns an order in which every plugin follows all its dependencies.
    pub fn topological_order(&self) -> Vec<String> {
        {
            let state = self.read();
            let hash = state.structural_hash();
            if let Some(cache) = state.cache.as_ref().filter(|cache| cache.hash == hash) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return cache.order.clone();
            }
        }

        let mut state = self.write();
        let hash = state.structural_hash();
        let order = state.compute_order();
        state.cache = Some(OrderCache {
            hash,
            order: order.clone(),
        });
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(nodes = order.len(), "Topological order recomputed");
        order
    }

    /// Returns the topological order cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Returns every plugin reachable from `name` mapped to its dependencies.
    ///
    /// Unknown dependencies appear with an empty list; an unknown root yields
    /// an empty map.
    pub fn dependency_tree(&self, name: &str) -> BTreeMap<String, Vec<String>> {
        let state = self.read();
        let mut tree = BTreeMap::new();
        if !state.forward.contains_key(name) {
            return tree;
        }

        let mut pending = vec![name.to_string()];
        while let Some(node) = pending.pop() {
            if tree.contains_key(&node) {
                continue;
            }
            let deps: Vec<String> = state
                .forward
                .get(&node)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();
            pending.extend(deps.iter().cloned());
            tree.insert(node, deps);
        }
        tree
    }
}

fn remove_edge(map: &mut BTreeMap<String, BTreeSet<String>>, key: &str, value: &str) {
    if let Some(set) = map.get_mut(key) {
        set.remove(value);
        if set.is_empty() {
            map.remove(key);
        }
    }
}
