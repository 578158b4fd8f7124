//! Tree visibility tracker.
//!
//! # Responsibility
//! - Hold the user's expanded-node set and persist it on every change.
//! - Answer ancestor, visibility and descendant queries against a snapshot.
//! - Build the nested forest consumed by tree views.
//!
//! # Invariants
//! - Unreadable or malformed persisted state loads as an empty set.
//! - Persistence failures are logged and never discard in-memory state.
//! - Every walk terminates on cyclic data.

use crate::engine::store::TaskStore;
use crate::model::task::{Task, TaskId};
use crate::repo::kv_repo::KeyValueStore;
use log::warn;
use std::collections::{BTreeSet, HashSet};

/// Storage key used when none is configured.
pub const DEFAULT_EXPANDED_KEYS_STORAGE_KEY: &str = "task-tree-expanded-keys";

/// Persisted set of expanded task IDs.
pub struct ExpandedKeys<S: KeyValueStore> {
    storage: S,
    storage_key: String,
    keys: BTreeSet<TaskId>,
}

impl<S: KeyValueStore> ExpandedKeys<S> {
    /// Loads the set from `storage`, treating any failure as empty.
    pub fn load(storage: S, storage_key: impl Into<String>) -> Self {
        let storage_key = storage_key.into();
        let keys = match storage.get(&storage_key) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<TaskId>>(&raw) {
                Ok(ids) => ids.into_iter().collect(),
                Err(err) => {
                    warn!(
                        "event=expanded_keys_load module=visibility status=error key={storage_key} error={err}"
                    );
                    BTreeSet::new()
                }
            },
            Ok(None) => BTreeSet::new(),
            Err(err) => {
                warn!(
                    "event=expanded_keys_load module=visibility status=error key={storage_key} error={err}"
                );
                BTreeSet::new()
            }
        };

        Self {
            storage,
            storage_key,
            keys,
        }
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.keys.contains(&id)
    }

    pub fn keys(&self) -> &BTreeSet<TaskId> {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn expand(&mut self, id: TaskId) {
        if self.keys.insert(id) {
            self.save();
        }
    }

    pub fn collapse(&mut self, id: TaskId) {
        if self.keys.remove(&id) {
            self.save();
        }
    }

    /// Flips `id` and returns whether it is now expanded.
    pub fn toggle(&mut self, id: TaskId) -> bool {
        let expanded = if self.keys.remove(&id) {
            false
        } else {
            self.keys.insert(id);
            true
        };
        self.save();
        expanded
    }

    /// Expands every loaded strict ancestor of `id` so it becomes visible.
    pub fn reveal(&mut self, store: &TaskStore, id: TaskId) {
        let mut changed = false;
        let mut visited = HashSet::from([id]);
        let mut current = store.get(id).and_then(|task| task.parent_id);
        while let Some(parent_id) = current {
            if !visited.insert(parent_id) {
                break;
            }
            changed |= self.keys.insert(parent_id);
            current = store.get(parent_id).and_then(|task| task.parent_id);
        }
        if changed {
            self.save();
        }
    }

    /// Collapses `id` together with every descendant.
    pub fn collapse_subtree(&mut self, store: &TaskStore, id: TaskId) {
        let mut changed = self.keys.remove(&id);
        for descendant in all_descendant_ids(store, id) {
            changed |= self.keys.remove(&descendant);
        }
        if changed {
            self.save();
        }
    }

    pub fn is_visible(&self, store: &TaskStore, id: TaskId) -> bool {
        is_visible(store, &self.keys, id)
    }

    pub fn nearest_visible_ancestor(&self, store: &TaskStore, id: TaskId) -> Option<TaskId> {
        nearest_visible_ancestor(store, &self.keys, id)
    }

    fn save(&self) {
        let encoded = match serde_json::to_string(&self.keys) {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!("event=expanded_keys_save module=visibility status=error error={err}");
                return;
            }
        };
        if let Err(err) = self.storage.set(&self.storage_key, &encoded) {
            warn!(
                "event=expanded_keys_save module=visibility status=error key={} error={err}",
                self.storage_key
            );
        }
    }
}

/// Whether walking up from `descendant` reaches a task whose parent is
/// exactly `ancestor`.
pub fn is_ancestor_of(store: &TaskStore, ancestor: TaskId, descendant: TaskId) -> bool {
    let mut visited = HashSet::new();
    let mut current = Some(descendant);
    while let Some(id) = current {
        if !visited.insert(id) {
            break;
        }
        let Some(task) = store.get(id) else {
            break;
        };
        if task.parent_id == Some(ancestor) {
            return true;
        }
        current = task.parent_id;
    }
    false
}

/// Whether every parent on the chain above `id` is expanded.
///
/// Roots are always visible. The walk stops at the first task missing from
/// the store.
pub fn is_visible(store: &TaskStore, expanded: &BTreeSet<TaskId>, id: TaskId) -> bool {
    let mut visited = HashSet::new();
    let mut current = Some(id);
    while let Some(current_id) = current {
        if !visited.insert(current_id) {
            break;
        }
        let Some(task) = store.get(current_id) else {
            break;
        };
        if let Some(parent_id) = task.parent_id {
            if !expanded.contains(&parent_id) {
                return false;
            }
        }
        current = task.parent_id;
    }
    true
}

/// First strict ancestor of `id` that is itself visible.
pub fn nearest_visible_ancestor(
    store: &TaskStore,
    expanded: &BTreeSet<TaskId>,
    id: TaskId,
) -> Option<TaskId> {
    let mut visited = HashSet::from([id]);
    let mut current = store.get(id)?.parent_id;
    while let Some(parent_id) = current {
        if !visited.insert(parent_id) {
            break;
        }
        let parent = store.get(parent_id)?;
        if is_visible(store, expanded, parent_id) {
            return Some(parent_id);
        }
        current = parent.parent_id;
    }
    None
}

/// Every strict descendant of `id`.
pub fn all_descendant_ids(store: &TaskStore, id: TaskId) -> HashSet<TaskId> {
    let mut descendants = HashSet::new();
    let mut pending = vec![id];
    while let Some(current) = pending.pop() {
        for child in store.children(current) {
            if child.id != id && descendants.insert(child.id) {
                pending.push(child.id);
            }
        }
    }
    descendants
}

/// Task with its ordered children, for tree rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskNode<'a> {
    pub task: &'a Task,
    pub children: Vec<TaskNode<'a>>,
}

impl TaskNode<'_> {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Nests the snapshot into a forest.
///
/// Tasks whose parent is not loaded are promoted to roots. Siblings keep the
/// store's position order.
pub fn build_forest(store: &TaskStore) -> Vec<TaskNode<'_>> {
    let mut roots: Vec<&Task> = store
        .iter()
        .filter(|task| match task.parent_id {
            None => true,
            Some(parent_id) => store.get(parent_id).is_none(),
        })
        .collect();
    roots.sort_by_key(|task| task.position);

    let mut visited = HashSet::new();
    roots
        .into_iter()
        .map(|root| build_node(store, root, &mut visited))
        .collect()
}

fn build_node<'a>(
    store: &'a TaskStore,
    task: &'a Task,
    visited: &mut HashSet<TaskId>,
) -> TaskNode<'a> {
    visited.insert(task.id);
    let children = store
        .children(task.id)
        .filter(|child| !visited.contains(&child.id))
        .collect::<Vec<_>>()
        .into_iter()
        .map(|child| build_node(store, child, visited))
        .collect();
    TaskNode { task, children }
}
