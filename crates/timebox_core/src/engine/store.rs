//! Flat task snapshot with an adjacency index.

use crate::model::task::{Task, TaskId, TaskStatus};
use std::collections::HashMap;

/// Per-status counts for a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub total: usize,
    pub todo: usize,
    pub in_progress: usize,
    pub suspended: usize,
    pub completed: usize,
    pub working: usize,
}

/// Immutable snapshot of a task list.
///
/// Children are indexed once at construction, ordered by `position` and then
/// by load order. Rebuild the store whenever the backing data changes.
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: Vec<Task>,
    by_id: HashMap<TaskId, usize>,
    children: HashMap<TaskId, Vec<usize>>,
    roots: Vec<usize>,
}

impl TaskStore {
    pub fn new(tasks: Vec<Task>) -> Self {
        let by_id: HashMap<TaskId, usize> = tasks
            .iter()
            .enumerate()
            .map(|(index, task)| (task.id, index))
            .collect();

        let mut children: HashMap<TaskId, Vec<usize>> = HashMap::new();
        let mut roots = Vec::new();
        for (index, task) in tasks.iter().enumerate() {
            match task.parent_id {
                Some(parent_id) => children.entry(parent_id).or_default().push(index),
                None => roots.push(index),
            }
        }
        for indexes in children.values_mut() {
            indexes.sort_by_key(|&index| (tasks[index].position, index));
        }
        roots.sort_by_key(|&index| (tasks[index].position, index));

        Self {
            tasks,
            by_id,
            children,
            roots,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.by_id.get(&id).map(|&index| &self.tasks[index])
    }

    /// Parent of `task`, if it is loaded.
    pub fn parent_of(&self, task: &Task) -> Option<&Task> {
        task.parent_id.and_then(|parent_id| self.get(parent_id))
    }

    /// Direct children, ordered by position.
    pub fn children(&self, id: TaskId) -> impl Iterator<Item = &Task> {
        self.children
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(|&index| &self.tasks[index])
    }

    pub fn has_children(&self, id: TaskId) -> bool {
        self.children
            .get(&id)
            .is_some_and(|indexes| !indexes.is_empty())
    }

    /// Tasks without a parent, ordered by position.
    pub fn roots(&self) -> impl Iterator<Item = &Task> {
        self.roots.iter().map(|&index| &self.tasks[index])
    }

    pub fn working_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|task| task.is_working())
    }

    /// First working task other than `exclude`.
    pub fn find_working_task(&self, exclude: Option<TaskId>) -> Option<&Task> {
        self.working_tasks().find(|task| Some(task.id) != exclude)
    }

    pub fn stats(&self) -> TaskStats {
        let mut stats = TaskStats {
            total: self.tasks.len(),
            ..TaskStats::default()
        };
        for task in &self.tasks {
            match task.status {
                TaskStatus::Todo => stats.todo += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Suspended => stats.suspended += 1,
                TaskStatus::Completed => stats.completed += 1,
            }
            if task.is_working() {
                stats.working += 1;
            }
        }
        stats
    }

    /// Consumes the store and returns the tasks in load order.
    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }
}

impl FromIterator<Task> for TaskStore {
    fn from_iter<I: IntoIterator<Item = Task>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::TaskStore;
    use crate::model::task::{ExecutionState, Task, TaskStatus};
    use uuid::Uuid;

    #[test]
    fn children_follow_position_then_load_order() {
        let project = Uuid::new_v4();
        let parent = Task::new(project, "parent");
        let mut late = Task::new(project, "late");
        late.parent_id = Some(parent.id);
        late.position = 5;
        let mut early = Task::new(project, "early");
        early.parent_id = Some(parent.id);
        early.position = 1;
        let mut tie = Task::new(project, "tie");
        tie.parent_id = Some(parent.id);
        tie.position = 1;

        let store = TaskStore::new(vec![parent.clone(), late, early, tie]);
        let titles: Vec<_> = store
            .children(parent.id)
            .map(|task| task.title.as_str())
            .collect();
        assert_eq!(titles, ["early", "tie", "late"]);
        assert!(store.has_children(parent.id));
        assert_eq!(store.roots().count(), 1);
    }

    #[test]
    fn stats_count_statuses_and_working() {
        let project = Uuid::new_v4();
        let mut working = Task::new(project, "a");
        working.status = TaskStatus::InProgress;
        working.execution_state = ExecutionState::Working;
        let mut done = Task::new(project, "b");
        done.status = TaskStatus::Completed;
        let todo = Task::new(project, "c");

        let store: TaskStore = [working.clone(), done, todo].into_iter().collect();
        let stats = store.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.todo, 1);
        assert_eq!(stats.working, 1);
        assert_eq!(store.find_working_task(None).map(|t| t.id), Some(working.id));
        assert!(store.find_working_task(Some(working.id)).is_none());
    }
}
