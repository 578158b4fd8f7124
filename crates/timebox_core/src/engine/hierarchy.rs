//! Hierarchy resolver: properties inherited through the parent chain.
//!
//! # Invariants
//! - Own values always win over inherited ones.
//! - Upward walks stop at a missing parent or a revisited ID.
//! - Downward estimate aggregation never visits a task twice.

use crate::engine::store::TaskStore;
use crate::model::task::{Task, TaskId};
use crate::model::timestamp::EpochMs;
use std::collections::HashSet;

/// Iterator over `task` and then each loaded ancestor, nearest first.
///
/// Ends at a root, at a parent missing from the store, or when an ID repeats.
pub fn self_and_ancestors<'a>(store: &'a TaskStore, task: &'a Task) -> AncestorWalk<'a> {
    AncestorWalk {
        store,
        next: Some(task),
        visited: HashSet::new(),
    }
}

pub struct AncestorWalk<'a> {
    store: &'a TaskStore,
    next: Option<&'a Task>,
    visited: HashSet<TaskId>,
}

impl<'a> Iterator for AncestorWalk<'a> {
    type Item = &'a Task;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        if !self.visited.insert(current.id) {
            return None;
        }
        self.next = self.store.parent_of(current);
        Some(current)
    }
}

/// Own `due_at`, else the nearest ancestor's.
pub fn effective_due_at(store: &TaskStore, task: &Task) -> Option<EpochMs> {
    self_and_ancestors(store, task).find_map(|current| current.due_at)
}

/// True when the task or any ancestor enforces its deadline.
pub fn effective_is_ddl(store: &TaskStore, task: &Task) -> bool {
    self_and_ancestors(store, task).any(|current| current.is_ddl)
}

/// Deadline enforced, due date present and strictly in the past.
pub fn is_locked(store: &TaskStore, task: &Task, now_ms: EpochMs) -> bool {
    effective_is_ddl(store, task) && is_overdue(store, task, now_ms)
}

/// Due date present and strictly in the past, enforcement aside.
pub fn is_overdue(store: &TaskStore, task: &Task, now_ms: EpochMs) -> bool {
    effective_due_at(store, task).is_some_and(|due_at| now_ms > due_at)
}

/// Own estimate, else the sum of children that resolve one.
///
/// `None` when neither the task nor any descendant carries an estimate.
/// Children without an estimate contribute nothing.
pub fn effective_estimated_time(store: &TaskStore, task: &Task) -> Option<i64> {
    let mut visited = HashSet::new();
    estimate_inner(store, task, &mut visited)
}

fn estimate_inner(store: &TaskStore, task: &Task, visited: &mut HashSet<TaskId>) -> Option<i64> {
    if !visited.insert(task.id) {
        return None;
    }
    if let Some(own) = task.estimated_time_ms {
        return Some(own);
    }

    let mut total: Option<i64> = None;
    for child in store.children(task.id) {
        if let Some(estimate) = estimate_inner(store, child, visited) {
            total = Some(total.unwrap_or(0) + estimate);
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::{
        effective_due_at, effective_estimated_time, effective_is_ddl, is_locked, is_overdue,
    };
    use crate::engine::store::TaskStore;
    use crate::model::task::Task;
    use uuid::Uuid;

    fn child_of(parent: &Task, title: &str) -> Task {
        let mut task = Task::new(parent.project_id, title);
        task.parent_id = Some(parent.id);
        task
    }

    #[test]
    fn due_date_and_ddl_inherit_from_nearest_ancestor() {
        let mut root = Task::new(Uuid::new_v4(), "root");
        root.due_at = Some(1_000);
        root.is_ddl = true;
        let mut middle = child_of(&root, "middle");
        middle.due_at = Some(2_000);
        let leaf = child_of(&middle, "leaf");
        let store = TaskStore::new(vec![root.clone(), middle, leaf.clone()]);

        assert_eq!(effective_due_at(&store, &leaf), Some(2_000));
        assert!(effective_is_ddl(&store, &leaf));
        assert!(!is_locked(&store, &leaf, 2_000));
        assert!(is_locked(&store, &leaf, 2_001));
        assert!(is_overdue(&store, &root, 1_001));
    }

    #[test]
    fn overdue_without_enforcement_is_not_locked() {
        let mut root = Task::new(Uuid::new_v4(), "root");
        root.due_at = Some(10);
        let leaf = child_of(&root, "leaf");
        let store = TaskStore::new(vec![root, leaf.clone()]);

        assert!(is_overdue(&store, &leaf, 11));
        assert!(!is_locked(&store, &leaf, 11));
    }

    #[test]
    fn no_ancestor_values_resolve_to_none_and_false() {
        let root = Task::new(Uuid::new_v4(), "root");
        let leaf = child_of(&root, "leaf");
        let store = TaskStore::new(vec![root, leaf.clone()]);

        assert_eq!(effective_due_at(&store, &leaf), None);
        assert!(!effective_is_ddl(&store, &leaf));
        assert!(!is_overdue(&store, &leaf, i64::MAX));
    }

    #[test]
    fn missing_parent_stops_the_walk() {
        let mut orphan = Task::new(Uuid::new_v4(), "orphan");
        orphan.parent_id = Some(Uuid::new_v4());
        let store = TaskStore::new(vec![orphan.clone()]);
        assert_eq!(effective_due_at(&store, &orphan), None);
    }

    #[test]
    fn cyclic_parents_terminate() {
        let project = Uuid::new_v4();
        let mut a = Task::new(project, "a");
        let mut b = Task::new(project, "b");
        a.parent_id = Some(b.id);
        b.parent_id = Some(a.id);
        let store = TaskStore::new(vec![a.clone(), b]);

        assert_eq!(effective_due_at(&store, &a), None);
        assert!(!effective_is_ddl(&store, &a));
        assert_eq!(effective_estimated_time(&store, &a), None);
    }

    #[test]
    fn estimate_sums_only_children_that_resolve_one() {
        let root = Task::new(Uuid::new_v4(), "root");
        let mut b = child_of(&root, "b");
        b.estimated_time_ms = Some(1_000);
        let c = child_of(&root, "c");
        let mut grandchild = child_of(&c, "c1");
        grandchild.estimated_time_ms = Some(250);
        let store = TaskStore::new(vec![root.clone(), b, c.clone(), grandchild]);

        assert_eq!(effective_estimated_time(&store, &root), Some(1_250));
        assert_eq!(effective_estimated_time(&store, &c), Some(250));
    }

    #[test]
    fn estimate_is_none_when_no_descendant_has_one() {
        let root = Task::new(Uuid::new_v4(), "root");
        let child = child_of(&root, "child");
        let store = TaskStore::new(vec![root.clone(), child.clone()]);

        assert_eq!(effective_estimated_time(&store, &root), None);
        assert_eq!(effective_estimated_time(&store, &child), None);
    }

    #[test]
    fn own_estimate_wins_even_when_zero() {
        let mut root = Task::new(Uuid::new_v4(), "root");
        root.estimated_time_ms = Some(0);
        let mut child = child_of(&root, "child");
        child.estimated_time_ms = Some(500);
        let store = TaskStore::new(vec![root.clone(), child]);

        assert_eq!(effective_estimated_time(&store, &root), Some(0));
    }
}
