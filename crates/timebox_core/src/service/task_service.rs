//! Task use-case service.
//!
//! # Responsibility
//! - Validate task writes above the repository layer.
//! - Keep parent status rolled up from children.
//! - Move deleted subtrees to the trash and bring them back.
//!
//! # Invariants
//! - Locked tasks (effective hard deadline passed) reject edits, moves and
//!   deletion. `unlock` and returning to idle are always allowed.
//! - At most one task is `working`, and only while `in_progress`.
//! - Re-parenting never creates a cycle and never crosses projects.
//! - Roll-up never demotes a working parent out of `in_progress`.

use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::engine::hierarchy::is_locked;
use crate::engine::store::TaskStore;
use crate::model::deleted_task::{DeletedTask, DeletedTaskId, DeletionMetadata, TaskSnapshot};
use crate::model::project::ProjectId;
use crate::model::task::{
    ExecutionState, Task, TaskId, TaskStatus, TaskValidationError, PRIORITY_DEFAULT,
};
use crate::model::time_slice::TimeSlice;
use crate::model::timestamp::EpochMs;
use crate::repo::project_repo::ProjectRepository;
use crate::repo::task_repo::{TaskListQuery, TaskRepository};
use crate::repo::trash_repo::TrashRepository;
use crate::repo::RepoError;
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Input for [`TaskService::create_task`].
#[derive(Debug, Clone)]
pub struct NewTask {
    pub project_id: ProjectId,
    pub parent_id: Option<TaskId>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<u8>,
    pub due_at: Option<EpochMs>,
    pub is_ddl: bool,
    pub estimated_time_ms: Option<i64>,
    pub status: Option<TaskStatus>,
    pub execution_state: Option<ExecutionState>,
    /// Next free sibling slot when `None`.
    pub position: Option<i64>,
}

impl NewTask {
    pub fn new(project_id: ProjectId, title: impl Into<String>) -> Self {
        Self {
            project_id,
            parent_id: None,
            title: title.into(),
            description: None,
            priority: None,
            due_at: None,
            is_ddl: false,
            estimated_time_ms: None,
            status: None,
            execution_state: None,
            position: None,
        }
    }

    pub fn under(mut self, parent_id: TaskId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// Partial task update. Outer `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub parent_id: Option<Option<TaskId>>,
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub priority: Option<u8>,
    pub due_at: Option<Option<EpochMs>>,
    pub is_ddl: Option<bool>,
    pub estimated_time_ms: Option<Option<i64>>,
    pub status: Option<TaskStatus>,
    pub execution_state: Option<ExecutionState>,
}

/// Errors from task service operations.
#[derive(Debug)]
pub enum TaskServiceError {
    /// Field-level validation failed.
    Validation(TaskValidationError),
    TaskNotFound(TaskId),
    ProjectNotFound(ProjectId),
    ParentNotFound(TaskId),
    /// Parent belongs to a different project.
    ParentProjectMismatch { parent_id: TaskId, project_id: ProjectId },
    /// Re-parenting would make the task its own ancestor.
    CycleDetected { task_id: TaskId, parent_id: TaskId },
    /// Effective hard deadline has passed.
    TaskLocked(TaskId),
    /// Another task already holds the working slot.
    AnotherTaskWorking { working_task_id: TaskId },
    ExecutionRequiresInProgress(TaskId),
    DeletedTaskNotFound(DeletedTaskId),
    Repo(RepoError),
}

impl Display for TaskServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::TaskNotFound(id) => write!(f, "task not found: {id}"),
            Self::ProjectNotFound(id) => write!(f, "project not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "parent task not found: {id}"),
            Self::ParentProjectMismatch {
                parent_id,
                project_id,
            } => write!(
                f,
                "parent task {parent_id} does not belong to project {project_id}"
            ),
            Self::CycleDetected { task_id, parent_id } => write!(
                f,
                "moving task {task_id} under {parent_id} would create a cycle"
            ),
            Self::TaskLocked(id) => write!(f, "task {id} is locked by an expired deadline"),
            Self::AnotherTaskWorking { working_task_id } => write!(
                f,
                "task {working_task_id} is already working; only one task may work at a time"
            ),
            Self::ExecutionRequiresInProgress(id) => {
                write!(f, "task {id} must be in_progress to start working")
            }
            Self::DeletedTaskNotFound(id) => write!(f, "deleted task not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TaskServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TaskValidationError> for TaskServiceError {
    fn from(value: TaskValidationError) -> Self {
        match value {
            TaskValidationError::SelfParent(id) => Self::CycleDetected {
                task_id: id,
                parent_id: id,
            },
            TaskValidationError::WorkingWithoutInProgress(id) => {
                Self::ExecutionRequiresInProgress(id)
            }
            other => Self::Validation(other),
        }
    }
}

impl From<RepoError> for TaskServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::TaskValidation(err) => err.into(),
            RepoError::NotFound { entity: "task", id } => Self::TaskNotFound(id),
            RepoError::NotFound {
                entity: "deleted task",
                id,
            } => Self::DeletedTaskNotFound(id),
            RepoError::NotFound {
                entity: "project",
                id,
            } => Self::ProjectNotFound(id),
            other => Self::Repo(other),
        }
    }
}

/// Task service facade.
pub struct TaskService<R, P, T, C>
where
    R: TaskRepository,
    P: ProjectRepository,
    T: TrashRepository,
    C: Clock,
{
    tasks: R,
    projects: P,
    trash: T,
    clock: C,
    trash_retention_ms: i64,
}

impl<R, P, T, C> TaskService<R, P, T, C>
where
    R: TaskRepository,
    P: ProjectRepository,
    T: TrashRepository,
    C: Clock,
{
    pub fn new(tasks: R, projects: P, trash: T, clock: C, config: &CoreConfig) -> Self {
        Self {
            tasks,
            projects,
            trash,
            clock,
            trash_retention_ms: config.trash_retention_ms(),
        }
    }

    pub fn create_task(&self, input: NewTask) -> Result<Task, TaskServiceError> {
        if self.projects.get_project(input.project_id)?.is_none() {
            return Err(TaskServiceError::ProjectNotFound(input.project_id));
        }
        if let Some(parent_id) = input.parent_id {
            self.ensure_parent(input.project_id, parent_id)?;
        }

        let mut task = Task::new(input.project_id, normalize_title(&input.title));
        task.parent_id = input.parent_id;
        task.description = input.description;
        task.priority = input.priority.unwrap_or(PRIORITY_DEFAULT);
        task.due_at = input.due_at;
        task.is_ddl = input.is_ddl;
        task.estimated_time_ms = input.estimated_time_ms;
        task.status = input.status.unwrap_or_default();
        task.execution_state = input.execution_state.unwrap_or_default();
        task.position = match input.position {
            Some(position) => position,
            None => self.tasks.next_position(task.project_id, task.parent_id)?,
        };
        if task.is_working() {
            self.ensure_can_work(&task)?;
        }
        task.validate()?;

        let id = self.tasks.create_task(&task)?;
        if let Some(parent_id) = task.parent_id {
            self.roll_up_from(parent_id)?;
        }
        info!(
            "event=task_create module=service status=ok task_id={id} project_id={}",
            task.project_id
        );
        self.get_task(id)
    }

    pub fn get_task(&self, id: TaskId) -> Result<Task, TaskServiceError> {
        self.tasks
            .get_task(id)?
            .ok_or(TaskServiceError::TaskNotFound(id))
    }

    /// Tasks ordered by position then creation, each with its own slices.
    pub fn list_tasks(
        &self,
        project_id: Option<ProjectId>,
    ) -> Result<Vec<Task>, TaskServiceError> {
        Ok(self.tasks.list_tasks(&TaskListQuery { project_id })?)
    }

    /// Snapshot for the engine, optionally limited to one project.
    pub fn load_store(
        &self,
        project_id: Option<ProjectId>,
    ) -> Result<TaskStore, TaskServiceError> {
        Ok(TaskStore::new(self.list_tasks(project_id)?))
    }

    /// Working task other than `exclude`, across every project.
    pub fn find_working_task(
        &self,
        exclude: Option<TaskId>,
    ) -> Result<Option<Task>, TaskServiceError> {
        Ok(self.tasks.find_working_task(exclude)?)
    }

    /// Same project and parent, the task itself included.
    pub fn siblings(&self, id: TaskId) -> Result<Vec<Task>, TaskServiceError> {
        let task = self.get_task(id)?;
        Ok(self.tasks.list_siblings(task.project_id, task.parent_id)?)
    }

    /// Sum of own logged time across every task of the project.
    pub fn project_logged_ms(&self, project_id: ProjectId) -> Result<i64, TaskServiceError> {
        Ok(self
            .list_tasks(Some(project_id))?
            .iter()
            .map(|task| task.total_logged_ms)
            .sum())
    }

    pub fn update_task(&self, id: TaskId, update: TaskUpdate) -> Result<Task, TaskServiceError> {
        let current = self.get_task(id)?;
        self.ensure_unlocked(&current)?;

        let mut next = current.clone();
        if let Some(title) = update.title {
            next.title = normalize_title(&title);
        }
        if let Some(description) = update.description {
            next.description = description;
        }
        if let Some(priority) = update.priority {
            next.priority = priority;
        }
        if let Some(due_at) = update.due_at {
            next.due_at = due_at;
        }
        if let Some(is_ddl) = update.is_ddl {
            next.is_ddl = is_ddl;
        }
        if let Some(estimate) = update.estimated_time_ms {
            next.estimated_time_ms = estimate;
        }
        if let Some(status) = update.status {
            next.status = status;
        }
        if let Some(state) = update.execution_state {
            next.execution_state = state;
        }

        let reparented = match update.parent_id {
            Some(parent_id) if parent_id != current.parent_id => {
                if let Some(parent_id) = parent_id {
                    self.ensure_parent(current.project_id, parent_id)?;
                    if self.would_create_cycle(id, parent_id)? {
                        return Err(TaskServiceError::CycleDetected {
                            task_id: id,
                            parent_id,
                        });
                    }
                }
                next.parent_id = parent_id;
                next.position = self.tasks.next_position(next.project_id, parent_id)?;
                true
            }
            _ => false,
        };

        if next.is_working() {
            self.ensure_can_work(&next)?;
        }
        next.validate()?;
        self.tasks.update_task(&next)?;

        if reparented {
            if let Some(old_parent) = current.parent_id {
                self.roll_up_from(old_parent)?;
            }
        }
        if let Some(parent_id) = next.parent_id {
            self.roll_up_from(parent_id)?;
        }
        if next.status != current.status {
            self.cascade_status(id, next.status)?;
        }

        info!("event=task_update module=service status=ok task_id={id}");
        self.get_task(id)
    }

    /// Flips `execution_state` only.
    ///
    /// `Working` enforces the deadline lock, the single-working-task rule and
    /// `in_progress`. `Idle` is always accepted so a session can end on a
    /// task whose deadline expired mid-session.
    pub fn set_execution_state(
        &self,
        id: TaskId,
        state: ExecutionState,
    ) -> Result<Task, TaskServiceError> {
        let mut task = self.get_task(id)?;
        if task.execution_state == state {
            return Ok(task);
        }
        task.execution_state = state;
        if task.is_working() {
            self.ensure_unlocked(&task)?;
            self.ensure_can_work(&task)?;
        }
        self.tasks.update_task(&task)?;
        info!(
            "event=task_execution_state module=service status=ok task_id={id} state={}",
            state.as_str()
        );
        Ok(task)
    }

    pub fn reposition(&self, id: TaskId, position: i64) -> Result<Task, TaskServiceError> {
        let task = self.get_task(id)?;
        self.ensure_unlocked(&task)?;
        self.tasks.set_position(id, position)?;
        self.get_task(id)
    }

    /// Clears the task's own hard-deadline flag; ancestors keep theirs.
    pub fn unlock(&self, id: TaskId) -> Result<Task, TaskServiceError> {
        let mut task = self.get_task(id)?;
        task.is_ddl = false;
        self.tasks.update_task(&task)?;
        info!("event=task_unlock module=service status=ok task_id={id}");
        self.get_task(id)
    }

    /// Moves the task and its subtree to the trash.
    pub fn delete_task(&self, id: TaskId) -> Result<DeletedTask, TaskServiceError> {
        let task = self.get_task(id)?;
        self.ensure_unlocked(&task)?;

        let snapshot = self.snapshot(task.clone(), &mut HashSet::new())?;
        let now = self.clock.now_ms();
        let record = DeletedTask {
            id: Uuid::new_v4(),
            task_id: id,
            deleted_at: now,
            expiry_at: now.saturating_add(self.trash_retention_ms),
            metadata: DeletionMetadata {
                title: task.title.clone(),
                project_id: task.project_id,
                total_descendants: snapshot.task_count(),
            },
            snapshot,
        };
        self.trash.move_to_trash(&record)?;

        if let Some(parent_id) = task.parent_id {
            self.roll_up_from(parent_id)?;
        }
        info!(
            "event=task_delete module=service status=ok task_id={id} trash_id={} tasks={}",
            record.id, record.metadata.total_descendants
        );
        Ok(record)
    }

    /// Unexpired trash records, newest deletion first.
    pub fn list_trash(&self) -> Result<Vec<DeletedTask>, TaskServiceError> {
        Ok(self.trash.list_active(self.clock.now_ms())?)
    }

    pub fn get_deleted_task(&self, id: DeletedTaskId) -> Result<DeletedTask, TaskServiceError> {
        self.trash
            .get_deleted_task(id)?
            .ok_or(TaskServiceError::DeletedTaskNotFound(id))
    }

    /// Recreates the trashed subtree under fresh IDs and drops the record.
    ///
    /// The root lands under its former parent when that task still exists in
    /// the same project, otherwise at project root. Restored tasks are idle
    /// and keep only their closed slices.
    pub fn restore(&self, id: DeletedTaskId) -> Result<Task, TaskServiceError> {
        let record = self.get_deleted_task(id)?;
        let project_id = record.snapshot.task.project_id;
        if self.projects.get_project(project_id)?.is_none() {
            return Err(TaskServiceError::ProjectNotFound(project_id));
        }

        let parent_id = match record.snapshot.task.parent_id {
            Some(parent_id) => self
                .tasks
                .get_task(parent_id)?
                .filter(|parent| parent.project_id == project_id)
                .map(|parent| parent.id),
            None => None,
        };
        let position = self.tasks.next_position(project_id, parent_id)?;

        let mut restored = Vec::with_capacity(record.metadata.total_descendants);
        let root_id = rebuild(&record.snapshot, parent_id, Some(position), &mut restored);
        self.trash.restore_tasks(id, &restored)?;

        if let Some(parent_id) = parent_id {
            self.roll_up_from(parent_id)?;
        }
        info!(
            "event=task_restore module=service status=ok trash_id={id} task_id={root_id} tasks={}",
            restored.len()
        );
        self.get_task(root_id)
    }

    pub fn permanent_delete(&self, id: DeletedTaskId) -> Result<(), TaskServiceError> {
        self.trash.delete_deleted_task(id)?;
        Ok(())
    }

    /// Removes every trash record and returns how many were removed.
    pub fn empty_trash(&self) -> Result<usize, TaskServiceError> {
        let removed = self.trash.delete_all()?;
        info!("event=trash_empty module=service status=ok removed={removed}");
        Ok(removed)
    }

    /// Removes records whose retention window has elapsed.
    pub fn cleanup_expired_trash(&self) -> Result<usize, TaskServiceError> {
        let removed = self.trash.delete_expired(self.clock.now_ms())?;
        if removed > 0 {
            info!("event=trash_cleanup module=service status=ok removed={removed}");
        }
        Ok(removed)
    }

    /// Loads `task` and its ancestors, nearest first, for lock resolution.
    fn lineage(&self, task: &Task) -> Result<TaskStore, TaskServiceError> {
        let mut chain = vec![task.clone()];
        let mut visited = HashSet::from([task.id]);
        let mut cursor = task.parent_id;
        while let Some(parent_id) = cursor {
            if !visited.insert(parent_id) {
                break;
            }
            let Some(parent) = self.tasks.get_task(parent_id)? else {
                break;
            };
            cursor = parent.parent_id;
            chain.push(parent);
        }
        Ok(TaskStore::new(chain))
    }

    fn ensure_unlocked(&self, task: &Task) -> Result<(), TaskServiceError> {
        let lineage = self.lineage(task)?;
        if is_locked(&lineage, task, self.clock.now_ms()) {
            warn!(
                "event=task_locked module=service status=error task_id={}",
                task.id
            );
            return Err(TaskServiceError::TaskLocked(task.id));
        }
        Ok(())
    }

    fn ensure_can_work(&self, task: &Task) -> Result<(), TaskServiceError> {
        if task.status != TaskStatus::InProgress {
            return Err(TaskServiceError::ExecutionRequiresInProgress(task.id));
        }
        if let Some(working) = self.tasks.find_working_task(Some(task.id))? {
            return Err(TaskServiceError::AnotherTaskWorking {
                working_task_id: working.id,
            });
        }
        Ok(())
    }

    fn ensure_parent(
        &self,
        project_id: ProjectId,
        parent_id: TaskId,
    ) -> Result<(), TaskServiceError> {
        let parent = self
            .tasks
            .get_task(parent_id)?
            .ok_or(TaskServiceError::ParentNotFound(parent_id))?;
        if parent.project_id != project_id {
            return Err(TaskServiceError::ParentProjectMismatch {
                parent_id,
                project_id,
            });
        }
        Ok(())
    }

    fn would_create_cycle(
        &self,
        task_id: TaskId,
        candidate_parent: TaskId,
    ) -> Result<bool, TaskServiceError> {
        let mut visited = HashSet::new();
        let mut cursor = Some(candidate_parent);
        while let Some(current) = cursor {
            if current == task_id || !visited.insert(current) {
                return Ok(true);
            }
            cursor = match self.tasks.get_task(current)? {
                Some(task) => task.parent_id,
                None => None,
            };
        }
        Ok(false)
    }

    /// Re-derives status for `parent_id` and each ancestor above it.
    fn roll_up_from(&self, parent_id: TaskId) -> Result<(), TaskServiceError> {
        let mut visited = HashSet::new();
        let mut cursor = Some(parent_id);
        while let Some(id) = cursor {
            if !visited.insert(id) {
                break;
            }
            let Some(mut parent) = self.tasks.get_task(id)? else {
                break;
            };
            let children = self.tasks.list_children(id)?;
            if children.is_empty() {
                break;
            }

            let rolled = if parent.is_working() {
                TaskStatus::InProgress
            } else {
                rolled_up_status(&children)
            };
            if parent.status != rolled {
                parent.status = rolled;
                self.tasks.update_task(&parent)?;
            }
            cursor = parent.parent_id;
        }
        Ok(())
    }

    /// Copies `status` onto direct children. Working children stay in progress.
    fn cascade_status(&self, id: TaskId, status: TaskStatus) -> Result<(), TaskServiceError> {
        for mut child in self.tasks.list_children(id)? {
            if child.status == status || child.is_working() {
                continue;
            }
            child.status = status;
            self.tasks.update_task(&child)?;
        }
        Ok(())
    }

    fn snapshot(
        &self,
        mut task: Task,
        visited: &mut HashSet<TaskId>,
    ) -> Result<TaskSnapshot, TaskServiceError> {
        visited.insert(task.id);
        let time_slices = std::mem::take(&mut task.time_slices);
        let mut children = Vec::new();
        for child in self.tasks.list_children(task.id)? {
            if !visited.contains(&child.id) {
                children.push(self.snapshot(child, visited)?);
            }
        }
        Ok(TaskSnapshot {
            task,
            time_slices,
            children,
        })
    }
}

/// All children completed: completed. Any in progress: in progress. Else todo.
pub fn rolled_up_status(children: &[Task]) -> TaskStatus {
    if children
        .iter()
        .all(|child| child.status == TaskStatus::Completed)
    {
        TaskStatus::Completed
    } else if children
        .iter()
        .any(|child| child.status == TaskStatus::InProgress)
    {
        TaskStatus::InProgress
    } else {
        TaskStatus::Todo
    }
}

fn normalize_title(value: &str) -> String {
    WHITESPACE_RE.replace_all(value.trim(), " ").into_owned()
}

/// Flattens `snapshot` into insertable tasks, parents first, under new IDs.
fn rebuild(
    snapshot: &TaskSnapshot,
    parent_id: Option<TaskId>,
    position: Option<i64>,
    out: &mut Vec<Task>,
) -> TaskId {
    let mut task = snapshot.task.clone();
    task.id = Uuid::new_v4();
    task.parent_id = parent_id;
    task.execution_state = ExecutionState::Idle;
    if let Some(position) = position {
        task.position = position;
    }
    task.time_slices = snapshot
        .time_slices
        .iter()
        .filter(|slice| !slice.is_open())
        .map(|slice| TimeSlice {
            id: Uuid::new_v4(),
            task_id: task.id,
            ..slice.clone()
        })
        .collect();
    task.total_logged_ms = task.closed_slices_total_ms();

    let id = task.id;
    out.push(task);
    for child in &snapshot.children {
        rebuild(child, Some(id), None, out);
    }
    id
}
