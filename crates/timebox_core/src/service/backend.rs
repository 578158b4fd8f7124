//! Local SQLite backend: every service over one connection.
//!
//! `LocalBackend` is the CRUD surface a presentation layer talks to, and the
//! [`WorkBackend`] the work-session manager drives.

use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::engine::store::TaskStore;
use crate::model::project::ProjectId;
use crate::model::task::{ExecutionState, TaskId};
use crate::model::time_slice::{TimeSlice, TimeSliceId};
use crate::model::timestamp::EpochMs;
use crate::repo::project_repo::SqliteProjectRepository;
use crate::repo::task_repo::SqliteTaskRepository;
use crate::repo::time_slice_repo::SqliteTimeSliceRepository;
use crate::repo::trash_repo::SqliteTrashRepository;
use crate::service::project_service::{ProjectService, ProjectServiceError};
use crate::service::task_service::{TaskService, TaskServiceError};
use crate::service::time_slice_service::{
    NewTimeSlice, TimeSliceService, TimeSliceServiceError, TimeSliceUpdate,
};
use crate::service::work_session::{SliceClose, WorkBackend};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type LocalProjectService<'conn> = ProjectService<SqliteProjectRepository<'conn>>;
pub type LocalTaskService<'conn, C> = TaskService<
    SqliteTaskRepository<'conn>,
    SqliteProjectRepository<'conn>,
    SqliteTrashRepository<'conn>,
    C,
>;
pub type LocalTimeSliceService<'conn> =
    TimeSliceService<SqliteTimeSliceRepository<'conn>, SqliteTaskRepository<'conn>>;

#[derive(Debug)]
pub enum BackendError {
    Project(ProjectServiceError),
    Task(TaskServiceError),
    TimeSlice(TimeSliceServiceError),
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Project(err) => write!(f, "{err}"),
            Self::Task(err) => write!(f, "{err}"),
            Self::TimeSlice(err) => write!(f, "{err}"),
        }
    }
}

impl Error for BackendError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Project(err) => Some(err),
            Self::Task(err) => Some(err),
            Self::TimeSlice(err) => Some(err),
        }
    }
}

impl From<ProjectServiceError> for BackendError {
    fn from(value: ProjectServiceError) -> Self {
        Self::Project(value)
    }
}

impl From<TaskServiceError> for BackendError {
    fn from(value: TaskServiceError) -> Self {
        Self::Task(value)
    }
}

impl From<TimeSliceServiceError> for BackendError {
    fn from(value: TimeSliceServiceError) -> Self {
        Self::TimeSlice(value)
    }
}

pub struct LocalBackend<'conn, C: Clock> {
    projects: LocalProjectService<'conn>,
    tasks: LocalTaskService<'conn, C>,
    time_slices: LocalTimeSliceService<'conn>,
}

impl<'conn, C: Clock> LocalBackend<'conn, C> {
    pub fn new(conn: &'conn Connection, clock: C, config: &CoreConfig) -> Self {
        Self {
            projects: ProjectService::new(SqliteProjectRepository::new(conn))
                .with_default_name(config.default_project_name.clone()),
            tasks: TaskService::new(
                SqliteTaskRepository::new(conn),
                SqliteProjectRepository::new(conn),
                SqliteTrashRepository::new(conn),
                clock,
                config,
            ),
            time_slices: TimeSliceService::new(
                SqliteTimeSliceRepository::new(conn),
                SqliteTaskRepository::new(conn),
            ),
        }
    }

    pub fn projects(&self) -> &LocalProjectService<'conn> {
        &self.projects
    }

    pub fn tasks(&self) -> &LocalTaskService<'conn, C> {
        &self.tasks
    }

    pub fn time_slices(&self) -> &LocalTimeSliceService<'conn> {
        &self.time_slices
    }

    /// Fresh engine snapshot of one project, or of everything.
    pub fn load_store(&self, project_id: Option<ProjectId>) -> Result<TaskStore, BackendError> {
        Ok(self.tasks.load_store(project_id)?)
    }
}

impl<C: Clock> WorkBackend for LocalBackend<'_, C> {
    type Error = BackendError;

    fn create_open_slice(
        &self,
        task_id: TaskId,
        start_at: EpochMs,
    ) -> Result<TimeSlice, Self::Error> {
        Ok(self
            .time_slices
            .create_time_slice(NewTimeSlice::open(task_id, start_at))?)
    }

    fn close_slice(
        &self,
        slice_id: TimeSliceId,
        close: SliceClose,
    ) -> Result<TimeSlice, Self::Error> {
        let update = TimeSliceUpdate {
            end_at: Some(Some(close.end_at)),
            duration_ms: Some(close.duration_ms),
            efficiency_score: Some(Some(close.efficiency_score)),
            note: Some(Some(close.note)),
            ..TimeSliceUpdate::default()
        };
        Ok(self.time_slices.update_time_slice(slice_id, update)?)
    }

    fn set_execution_state(
        &self,
        task_id: TaskId,
        state: ExecutionState,
    ) -> Result<(), Self::Error> {
        self.tasks.set_execution_state(task_id, state)?;
        Ok(())
    }

    fn find_working_task(&self, exclude: Option<TaskId>) -> Result<Option<TaskId>, Self::Error> {
        Ok(self.tasks.find_working_task(exclude)?.map(|task| task.id))
    }
}
