//! Parent -> child existence cache.
//!
//! Three nested concurrent maps: parent type -> parent name -> child type ->
//! set of child names. Every level is a sharded `DashMap`, so callers touching
//! different parents or child types do not contend on one lock.
//!
//! Empty levels are left in place after their last child is removed. They cost
//! a few small allocations per parent and keep `add_child` on the read path for
//! parents that churn children.

use std::hash::BuildHasherDefault;

use dashmap::mapref::one::Ref;
use dashmap::{DashMap, DashSet};
use metrics::counter;
use rustc_hash::FxHasher;
use tracing::trace;

type FxBuild = BuildHasherDefault<FxHasher>;
type Level<V> = DashMap<String, V, FxBuild>;

type ChildNames = DashSet<String, FxBuild>;
type ChildTypes = Level<ChildNames>;
type ParentNames = Level<ChildTypes>;

/// Look up `key`, creating an empty value on first use. Returns a shared guard.
fn level<'a, V: Default>(map: &'a Level<V>, key: &str) -> Ref<'a, String, V, FxBuild> {
    if let Some(r) = map.get(key) {
        return r;
    }
    map.entry(key.to_owned()).or_default().downgrade()
}

#[derive(Debug, Default)]
pub struct ParentChildCache {
    parents: Level<ParentNames>,
}

impl ParentChildCache {
    pub fn new() -> Self { Self::default() }

    /// Record that `child_name` of `child_type` exists under the given parent.
    /// Returns `true` if the link was not present before.
    pub fn add_child(&self, parent_type: &str, parent_name: &str, child_type: &str, child_name: &str) -> bool {
        let names = level(&self.parents, parent_type);
        let types = level(names.value(), parent_name);
        let children = level(types.value(), child_type);
        let inserted = children.insert(child_name.to_owned());
        if inserted {
            counter!("nexus_cache_add_total", 1u64);
            trace!(parent_type, parent_name, child_type, child_name, "child added");
        }
        inserted
    }

    /// Forget a single child link. Missing levels make this a no-op.
    /// Returns `true` if the link was present.
    pub fn remove_child(&self, parent_type: &str, parent_name: &str, child_type: &str, child_name: &str) -> bool {
        let Some(names) = self.parents.get(parent_type) else { return false };
        let Some(types) = names.get(parent_name) else { return false };
        let Some(children) = types.get(child_type) else { return false };
        let removed = children.remove(child_name).is_some();
        if removed {
            counter!("nexus_cache_remove_total", 1u64);
            trace!(parent_type, parent_name, child_type, child_name, "child removed");
        }
        removed
    }

    pub fn exists(&self, parent_type: &str, parent_name: &str, child_type: &str, child_name: &str) -> bool {
        self.with_children(parent_type, parent_name, child_type, |children| children.contains(child_name))
            .unwrap_or(false)
    }

    /// Names of all `child_type` children under the parent, in no particular order.
    pub fn list_children(&self, parent_type: &str, parent_name: &str, child_type: &str) -> Vec<String> {
        self.with_children(parent_type, parent_name, child_type, |children| {
            children.iter().map(|n| n.key().clone()).collect()
        })
        .unwrap_or_default()
    }

    pub fn count_children(&self, parent_type: &str, parent_name: &str, child_type: &str) -> usize {
        self.with_children(parent_type, parent_name, child_type, |children| children.len()).unwrap_or(0)
    }

    /// Child types that currently have at least one child under the parent.
    pub fn child_types(&self, parent_type: &str, parent_name: &str) -> Vec<String> {
        let Some(names) = self.parents.get(parent_type) else { return Vec::new() };
        let Some(types) = names.get(parent_name) else { return Vec::new() };
        let out: Vec<String> = types.iter().filter(|e| !e.value().is_empty()).map(|e| e.key().clone()).collect();
        out
    }

    fn with_children<R>(
        &self,
        parent_type: &str,
        parent_name: &str,
        child_type: &str,
        f: impl FnOnce(&ChildNames) -> R,
    ) -> Option<R> {
        let names = self.parents.get(parent_type)?;
        let types = names.get(parent_name)?;
        let children = types.get(child_type)?;
        Some(f(&children))
    }
}
