//! Time slice use-case service.
//!
//! # Invariants
//! - A task owns at most one open slice.
//! - Closed slices of one task never overlap.
//! - A closed slice stays closed; `duration_ms` defaults to `end_at - start_at`.

use crate::model::task::TaskId;
use crate::model::time_slice::{TimeSlice, TimeSliceId, TimeSliceValidationError};
use crate::model::timestamp::EpochMs;
use crate::repo::task_repo::TaskRepository;
use crate::repo::time_slice_repo::{TimeSliceListQuery, TimeSliceRepository};
use crate::repo::RepoError;
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Input for [`TimeSliceService::create_time_slice`]. No `end_at` means open.
#[derive(Debug, Clone)]
pub struct NewTimeSlice {
    pub task_id: TaskId,
    pub start_at: EpochMs,
    pub end_at: Option<EpochMs>,
    pub duration_ms: Option<i64>,
    pub efficiency_score: Option<u8>,
    pub note: Option<String>,
}

impl NewTimeSlice {
    pub fn open(task_id: TaskId, start_at: EpochMs) -> Self {
        Self {
            task_id,
            start_at,
            end_at: None,
            duration_ms: None,
            efficiency_score: None,
            note: None,
        }
    }

    pub fn closed(task_id: TaskId, start_at: EpochMs, end_at: EpochMs, score: u8) -> Self {
        Self {
            end_at: Some(end_at),
            efficiency_score: Some(score),
            ..Self::open(task_id, start_at)
        }
    }
}

/// Partial slice update. Outer `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TimeSliceUpdate {
    pub start_at: Option<EpochMs>,
    pub end_at: Option<Option<EpochMs>>,
    /// Recomputed from the merged bounds when not given.
    pub duration_ms: Option<i64>,
    pub efficiency_score: Option<Option<u8>>,
    pub note: Option<Option<String>>,
}

#[derive(Debug)]
pub enum TimeSliceServiceError {
    Validation(TimeSliceValidationError),
    TaskNotFound(TaskId),
    TimeSliceNotFound(TimeSliceId),
    /// Closed range collides with another closed slice of the task.
    Overlap { task_id: TaskId },
    /// The task already owns an open slice.
    AlreadyOpen { task_id: TaskId, slice_id: TimeSliceId },
    /// Clearing `end_at` on a closed slice.
    ReopenClosed(TimeSliceId),
    Repo(RepoError),
}

impl Display for TimeSliceServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::TaskNotFound(id) => write!(f, "task not found: {id}"),
            Self::TimeSliceNotFound(id) => write!(f, "time slice not found: {id}"),
            Self::Overlap { task_id } => {
                write!(f, "time slice overlaps an existing entry of task {task_id}")
            }
            Self::AlreadyOpen { task_id, slice_id } => {
                write!(f, "task {task_id} already has open time slice {slice_id}")
            }
            Self::ReopenClosed(id) => write!(f, "closed time slice cannot be reopened: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TimeSliceServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TimeSliceValidationError> for TimeSliceServiceError {
    fn from(value: TimeSliceValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for TimeSliceServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::TimeSliceValidation(err) => Self::Validation(err),
            RepoError::NotFound {
                entity: "time slice",
                id,
            } => Self::TimeSliceNotFound(id),
            RepoError::NotFound { entity: "task", id } => Self::TaskNotFound(id),
            other => Self::Repo(other),
        }
    }
}

/// Time slice service facade.
pub struct TimeSliceService<S: TimeSliceRepository, R: TaskRepository> {
    slices: S,
    tasks: R,
}

impl<S: TimeSliceRepository, R: TaskRepository> TimeSliceService<S, R> {
    pub fn new(slices: S, tasks: R) -> Self {
        Self { slices, tasks }
    }

    pub fn create_time_slice(
        &self,
        input: NewTimeSlice,
    ) -> Result<TimeSlice, TimeSliceServiceError> {
        if self.tasks.get_task(input.task_id)?.is_none() {
            return Err(TimeSliceServiceError::TaskNotFound(input.task_id));
        }

        let mut slice = TimeSlice::open(input.task_id, input.start_at);
        slice.note = input.note;
        match input.end_at {
            Some(end_at) => {
                slice.end_at = Some(end_at);
                slice.efficiency_score = input.efficiency_score;
                slice.duration_ms = Some(match input.duration_ms {
                    Some(duration) => duration,
                    None => span(slice.start_at, end_at)?,
                });
                slice.validate()?;
                self.ensure_no_overlap(&slice)?;
            }
            None => {
                if let Some(open) = self.slices.find_open_slice(input.task_id)? {
                    return Err(TimeSliceServiceError::AlreadyOpen {
                        task_id: input.task_id,
                        slice_id: open.id,
                    });
                }
                slice.validate()?;
            }
        }

        let id = self.slices.create_time_slice(&slice)?;
        info!(
            "event=time_slice_create module=service status=ok slice_id={id} task_id={} open={}",
            slice.task_id,
            slice.is_open()
        );
        self.get_time_slice(id)
    }

    pub fn get_time_slice(&self, id: TimeSliceId) -> Result<TimeSlice, TimeSliceServiceError> {
        self.slices
            .get_time_slice(id)?
            .ok_or(TimeSliceServiceError::TimeSliceNotFound(id))
    }

    /// Per task: oldest first. Unfiltered: newest first.
    pub fn list_time_slices(
        &self,
        task_id: Option<TaskId>,
    ) -> Result<Vec<TimeSlice>, TimeSliceServiceError> {
        Ok(self
            .slices
            .list_time_slices(&TimeSliceListQuery { task_id })?)
    }

    pub fn update_time_slice(
        &self,
        id: TimeSliceId,
        update: TimeSliceUpdate,
    ) -> Result<TimeSlice, TimeSliceServiceError> {
        let current = self.get_time_slice(id)?;
        let mut next = current.clone();

        if let Some(start_at) = update.start_at {
            next.start_at = start_at;
        }
        if let Some(end_at) = update.end_at {
            next.end_at = end_at;
        }
        if let Some(score) = update.efficiency_score {
            next.efficiency_score = score;
        }
        if let Some(note) = update.note {
            next.note = note;
        }
        if !current.is_open() && next.is_open() {
            return Err(TimeSliceServiceError::ReopenClosed(id));
        }

        if let Some(end_at) = next.end_at {
            next.duration_ms = Some(match update.duration_ms {
                Some(duration) => duration,
                None => span(next.start_at, end_at)?,
            });
            next.validate()?;
            self.ensure_no_overlap(&next)?;
        } else {
            next.validate()?;
        }

        self.slices.update_time_slice(&next)?;
        if current.is_open() && !next.is_open() {
            info!(
                "event=time_slice_close module=service status=ok slice_id={id} task_id={} duration_ms={}",
                next.task_id,
                next.duration_ms.unwrap_or_default()
            );
        }
        self.get_time_slice(id)
    }

    pub fn delete_time_slice(&self, id: TimeSliceId) -> Result<(), TimeSliceServiceError> {
        self.slices.delete_time_slice(id)?;
        Ok(())
    }

    fn ensure_no_overlap(&self, slice: &TimeSlice) -> Result<(), TimeSliceServiceError> {
        let Some(end_at) = slice.end_at else {
            return Ok(());
        };
        if self
            .slices
            .has_overlap(slice.task_id, slice.start_at, end_at, Some(slice.id))?
        {
            return Err(TimeSliceServiceError::Overlap {
                task_id: slice.task_id,
            });
        }
        Ok(())
    }
}

fn span(start_at: EpochMs, end_at: EpochMs) -> Result<i64, TimeSliceValidationError> {
    if end_at < start_at {
        return Err(TimeSliceValidationError::EndBeforeStart { start_at, end_at });
    }
    Ok(end_at - start_at)
}
