//! Trash record for soft-deleted task subtrees.
//!
//! # Invariants
//! - `snapshot` holds the full subtree, including every task's slices.
//! - A record is destroyed by restore, permanent delete or expiry.

use crate::model::project::ProjectId;
use crate::model::task::{Task, TaskId};
use crate::model::time_slice::TimeSlice;
use crate::model::timestamp::{iso8601, EpochMs};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable trash record identifier.
pub type DeletedTaskId = Uuid;

/// Recursive subtree snapshot.
///
/// `task.time_slices` is left empty; slices live in `time_slices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task: Task,
    pub time_slices: Vec<TimeSlice>,
    pub children: Vec<TaskSnapshot>,
}

impl TaskSnapshot {
    /// Number of tasks in this snapshot, the root included.
    pub fn task_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(TaskSnapshot::task_count)
            .sum::<usize>()
    }
}

/// Summary metadata stored next to the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionMetadata {
    pub title: String,
    pub project_id: ProjectId,
    /// Counts the deleted task itself.
    pub total_descendants: usize,
}

/// Trash record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedTask {
    pub id: DeletedTaskId,
    pub task_id: TaskId,
    #[serde(with = "iso8601")]
    pub deleted_at: EpochMs,
    #[serde(with = "iso8601")]
    pub expiry_at: EpochMs,
    pub snapshot: TaskSnapshot,
    pub metadata: DeletionMetadata,
}

impl DeletedTask {
    pub fn is_expired(&self, now_ms: EpochMs) -> bool {
        self.expiry_at <= now_ms
    }
}
