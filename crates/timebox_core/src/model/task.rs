//! Task domain model.
//!
//! # Responsibility
//! - Define the task record shared by the engine, repositories and services.
//! - Provide validation for persisted task fields.
//!
//! # Invariants
//! - `parent_id` never equals `id`; deeper cycles are rejected by services.
//! - `execution_state == Working` only while `status == InProgress`.
//! - `total_logged_ms` is the sum of this task's own closed slice durations.

use crate::model::project::ProjectId;
use crate::model::time_slice::TimeSlice;
use crate::model::timestamp::{iso8601, iso8601_option, EpochMs};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable task identifier.
pub type TaskId = Uuid;

/// Highest priority value.
pub const PRIORITY_HIGHEST: u8 = 1;
/// Lowest priority value.
pub const PRIORITY_LOWEST: u8 = 5;
/// Priority assigned when the caller does not pick one.
pub const PRIORITY_DEFAULT: u8 = 3;
/// Maximum title length in characters.
pub const TITLE_MAX_CHARS: usize = 200;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Suspended,
    Completed,
}

impl TaskStatus {
    /// Storage/wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
        }
    }

    /// Parses the storage/wire representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "todo" => Some(Self::Todo),
            "in_progress" => Some(Self::InProgress),
            "suspended" => Some(Self::Suspended),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// Whether a work session is currently running on the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    #[default]
    Idle,
    Working,
}

impl ExecutionState {
    /// Storage/wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Working => "working",
        }
    }

    /// Parses the storage/wire representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(Self::Idle),
            "working" => Some(Self::Working),
            _ => None,
        }
    }
}

/// Task record, including its own time slices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    /// `None` means the task sits at project root.
    pub parent_id: Option<TaskId>,
    pub title: String,
    pub description: Option<String>,
    /// 1 (highest) to 5 (lowest).
    pub priority: u8,
    #[serde(with = "iso8601_option")]
    pub due_at: Option<EpochMs>,
    /// Whether `due_at` is enforced as a hard deadline.
    pub is_ddl: bool,
    /// Own estimate only; children are aggregated by the engine.
    pub estimated_time_ms: Option<i64>,
    pub status: TaskStatus,
    pub execution_state: ExecutionState,
    /// Sibling ordering key; not globally unique.
    pub position: i64,
    #[serde(with = "iso8601")]
    pub created_at: EpochMs,
    #[serde(with = "iso8601")]
    pub updated_at: EpochMs,
    pub total_logged_ms: i64,
    #[serde(default)]
    pub time_slices: Vec<TimeSlice>,
}

impl Task {
    /// Creates a root-level `todo` task with a generated ID and default fields.
    pub fn new(project_id: ProjectId, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            parent_id: None,
            title: title.into(),
            description: None,
            priority: PRIORITY_DEFAULT,
            due_at: None,
            is_ddl: false,
            estimated_time_ms: None,
            status: TaskStatus::Todo,
            execution_state: ExecutionState::Idle,
            position: 0,
            created_at: 0,
            updated_at: 0,
            total_logged_ms: 0,
            time_slices: Vec::new(),
        }
    }

    /// Returns the task's open slice, if any.
    pub fn open_slice(&self) -> Option<&TimeSlice> {
        self.time_slices.iter().find(|slice| slice.is_open())
    }

    pub fn is_working(&self) -> bool {
        self.execution_state == ExecutionState::Working
    }

    /// Sum of own closed slice durations, as the store maintains `total_logged_ms`.
    pub fn closed_slices_total_ms(&self) -> i64 {
        self.time_slices
            .iter()
            .filter_map(|slice| slice.duration_ms)
            .sum()
    }

    /// Validates field-level invariants.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        let title_len = self.title.trim().chars().count();
        if title_len == 0 {
            return Err(TaskValidationError::BlankTitle);
        }
        if title_len > TITLE_MAX_CHARS {
            return Err(TaskValidationError::TitleTooLong(title_len));
        }
        if !(PRIORITY_HIGHEST..=PRIORITY_LOWEST).contains(&self.priority) {
            return Err(TaskValidationError::PriorityOutOfRange(self.priority));
        }
        if let Some(estimate) = self.estimated_time_ms {
            if estimate < 0 {
                return Err(TaskValidationError::NegativeEstimate(estimate));
            }
        }
        if self.parent_id == Some(self.id) {
            return Err(TaskValidationError::SelfParent(self.id));
        }
        if self.execution_state == ExecutionState::Working && self.status != TaskStatus::InProgress
        {
            return Err(TaskValidationError::WorkingWithoutInProgress(self.id));
        }
        Ok(())
    }
}

/// Field-level task validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskValidationError {
    BlankTitle,
    TitleTooLong(usize),
    PriorityOutOfRange(u8),
    NegativeEstimate(i64),
    SelfParent(TaskId),
    WorkingWithoutInProgress(TaskId),
}

impl Display for TaskValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankTitle => write!(f, "task title must not be blank"),
            Self::TitleTooLong(len) => {
                write!(f, "task title has {len} chars; max is {TITLE_MAX_CHARS}")
            }
            Self::PriorityOutOfRange(value) => write!(
                f,
                "priority {value} is outside {PRIORITY_HIGHEST}..={PRIORITY_LOWEST}"
            ),
            Self::NegativeEstimate(value) => {
                write!(f, "estimated_time_ms must be non-negative, got {value}")
            }
            Self::SelfParent(id) => write!(f, "task cannot be its own parent: {id}"),
            Self::WorkingWithoutInProgress(id) => {
                write!(f, "task {id} can only be working while in_progress")
            }
        }
    }
}

impl Error for TaskValidationError {}

#[cfg(test)]
mod tests {
    use super::{ExecutionState, Task, TaskStatus, TaskValidationError};
    use uuid::Uuid;

    #[test]
    fn status_and_state_roundtrip_storage_names() {
        for status in [
            TaskStatus::Todo,
            TaskStatus::InProgress,
            TaskStatus::Suspended,
            TaskStatus::Completed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionState::parse("working"), Some(ExecutionState::Working));
        assert_eq!(ExecutionState::parse("busy"), None);
    }

    #[test]
    fn validate_rejects_working_outside_in_progress() {
        let mut task = Task::new(Uuid::new_v4(), "write report");
        task.execution_state = ExecutionState::Working;
        assert!(matches!(
            task.validate(),
            Err(TaskValidationError::WorkingWithoutInProgress(_))
        ));

        task.status = TaskStatus::InProgress;
        assert!(task.validate().is_ok());
    }

    #[test]
    fn validate_rejects_priority_and_estimate_out_of_range() {
        let mut task = Task::new(Uuid::new_v4(), "x");
        task.priority = 6;
        assert_eq!(
            task.validate(),
            Err(TaskValidationError::PriorityOutOfRange(6))
        );
        task.priority = 1;
        task.estimated_time_ms = Some(-5);
        assert_eq!(task.validate(), Err(TaskValidationError::NegativeEstimate(-5)));
    }
}
