//! Work-session lifecycle: the idle/working state machine.
//!
//! # Responsibility
//! - Open and close time slices as work starts and stops.
//! - Hold the single in-memory handle for the session in progress.
//! - Rebuild that handle from persisted data and repair drift after reload.
//!
//! # Invariants
//! - At most one task is working, and a task is working exactly when it owns
//!   an open slice.
//! - Starting creates the open slice before flipping the task to `working`;
//!   stopping closes the slice before flipping it back to `idle`. A crash
//!   between the two steps leaves an open slice, never a working task
//!   without one.
//! - An idle task that owns an open slice is an interrupted start. Starting
//!   the task again adopts that slice, and stopping it closes the slice.
//! - The manager never stops another task implicitly, except through
//!   [`WorkSessionManager::switch_to`].
//! - A backward clock jump closes the slice with zero duration at `start_at`.

use crate::clock::Clock;
use crate::config::{CoreConfig, DEFAULT_EFFICIENCY_SCORE};
use crate::engine::hierarchy::is_locked;
use crate::engine::store::TaskStore;
use crate::model::task::{ExecutionState, Task, TaskId, TaskStatus};
use crate::model::time_slice::{TimeSlice, TimeSliceId};
use crate::model::timestamp::EpochMs;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Persistence calls the manager issues. Implemented by `LocalBackend`.
pub trait WorkBackend {
    type Error: Error + 'static;

    fn create_open_slice(&self, task_id: TaskId, start_at: EpochMs)
        -> Result<TimeSlice, Self::Error>;
    fn close_slice(&self, slice_id: TimeSliceId, close: SliceClose)
        -> Result<TimeSlice, Self::Error>;
    fn set_execution_state(&self, task_id: TaskId, state: ExecutionState)
        -> Result<(), Self::Error>;
    /// Persisted working task other than `exclude`, in any project.
    fn find_working_task(&self, exclude: Option<TaskId>) -> Result<Option<TaskId>, Self::Error>;
}

/// Values written when a slice is closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceClose {
    pub end_at: EpochMs,
    pub duration_ms: i64,
    pub efficiency_score: u8,
    pub note: String,
}

/// Handle for the work session in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSession {
    pub slice_id: TimeSliceId,
    pub start_at: EpochMs,
    pub task_id: TaskId,
}

/// `execution_state` and open-slice ownership as one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Idle,
    Working {
        slice_id: TimeSliceId,
        start_at: EpochMs,
    },
}

/// Resolves the task's phase, reporting any disagreement as drift.
pub fn execution_phase(task: &Task) -> Result<ExecutionPhase, ConsistencyError> {
    let open = task.open_slice();
    match (task.execution_state, open) {
        (ExecutionState::Working, Some(slice)) => Ok(ExecutionPhase::Working {
            slice_id: slice.id,
            start_at: slice.start_at,
        }),
        (ExecutionState::Idle, None) => Ok(ExecutionPhase::Idle),
        (execution_state, open) => Err(ConsistencyError::Drift {
            task_id: task.id,
            execution_state,
            open_slice: open.map(|slice| slice.id),
        }),
    }
}

/// Optional values for [`WorkSessionManager::stop_work`].
#[derive(Debug, Clone, Default)]
pub struct StopWorkOptions {
    /// Config default (3) when `None`.
    pub efficiency_score: Option<u8>,
    /// Empty when `None`.
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    NotInProgress { task_id: TaskId, status: TaskStatus },
    Locked(TaskId),
    /// The task already has an open slice or the active handle.
    AlreadyWorking(TaskId),
    /// A different task holds the working slot.
    OtherTaskWorking { task_id: TaskId },
    /// Nothing to stop, even after recovery.
    NoActiveSession(TaskId),
}

impl Display for PreconditionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotInProgress { task_id, status } => write!(
                f,
                "task {task_id} is {}; only in_progress tasks can start work",
                status.as_str()
            ),
            Self::Locked(id) => write!(f, "task {id} is locked by an expired deadline"),
            Self::AlreadyWorking(id) => write!(f, "task {id} is already working"),
            Self::OtherTaskWorking { task_id } => {
                write!(f, "task {task_id} is working; stop it first")
            }
            Self::NoActiveSession(id) => write!(f, "task {id} has no open time slice"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    /// `execution_state` disagrees with open-slice ownership.
    Drift {
        task_id: TaskId,
        execution_state: ExecutionState,
        open_slice: Option<TimeSliceId>,
    },
    /// The active handle belongs to another task.
    HandleMismatch { handle_task: TaskId, requested: TaskId },
}

impl Display for ConsistencyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drift {
                task_id,
                execution_state,
                open_slice,
            } => match open_slice {
                Some(slice_id) => write!(
                    f,
                    "task {task_id} is {} but owns open slice {slice_id}",
                    execution_state.as_str()
                ),
                None => write!(
                    f,
                    "task {task_id} is {} without an open slice",
                    execution_state.as_str()
                ),
            },
            Self::HandleMismatch {
                handle_task,
                requested,
            } => write!(
                f,
                "active work session belongs to task {handle_task}, not {requested}"
            ),
        }
    }
}

#[derive(Debug)]
pub enum WorkSessionError<E> {
    Precondition(PreconditionError),
    Consistency(ConsistencyError),
    NotFound(TaskId),
    Backend(E),
}

impl<E: Display> Display for WorkSessionError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Precondition(err) => write!(f, "{err}"),
            Self::Consistency(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "task not found: {id}"),
            Self::Backend(err) => write!(f, "{err}"),
        }
    }
}

impl<E: Error + 'static> Error for WorkSessionError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Backend(err) => Some(err),
            _ => None,
        }
    }
}

impl<E> From<PreconditionError> for WorkSessionError<E> {
    fn from(value: PreconditionError) -> Self {
        Self::Precondition(value)
    }
}

impl<E> From<ConsistencyError> for WorkSessionError<E> {
    fn from(value: ConsistencyError) -> Self {
        Self::Consistency(value)
    }
}

/// Outcome of [`WorkSessionManager::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Handle installed from the first consistent working task.
    pub recovered: Option<WorkSession>,
    /// Working tasks without an open slice, now set idle.
    pub forced_idle: Vec<TaskId>,
    /// Further working tasks with open slices; left untouched.
    pub conflicting: Vec<TaskId>,
    /// Idle tasks that still own an open slice.
    pub orphaned: Vec<(TaskId, TimeSliceId)>,
    /// Orphaned slices closed with zero duration instead of being adopted.
    pub closed_orphans: Vec<TimeSliceId>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.forced_idle.is_empty() && self.conflicting.is_empty() && self.orphaned.is_empty()
    }
}

/// Owns the in-memory work-session handle.
pub struct WorkSessionManager<C: Clock> {
    clock: C,
    default_score: u8,
    current: Option<WorkSession>,
}

impl<C: Clock> WorkSessionManager<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            default_score: DEFAULT_EFFICIENCY_SCORE,
            current: None,
        }
    }

    pub fn from_config(clock: C, config: &CoreConfig) -> Self {
        Self {
            default_score: config.default_efficiency_score,
            ..Self::new(clock)
        }
    }

    pub fn current(&self) -> Option<&WorkSession> {
        self.current.as_ref()
    }

    /// Elapsed time of the active session; 0 without one or if time ran backward.
    pub fn current_duration_ms(&self) -> i64 {
        self.current
            .map(|session| (self.clock.now_ms() - session.start_at).max(0))
            .unwrap_or(0)
    }

    /// Drops the handle without touching persisted state.
    pub fn clear(&mut self) {
        self.current = None;
    }

    /// Opens a slice for `task_id` and marks it working.
    ///
    /// # Errors
    /// - `NotFound` when the task is not in `store`.
    /// - `Precondition` when the task is not `in_progress`, is locked,
    ///   already works, or another task holds the working slot.
    /// - `Backend` when either persisted mutation fails.
    ///
    /// An open slice left by an interrupted start is adopted instead of
    /// opening a new one.
    pub fn start_work<B: WorkBackend>(
        &mut self,
        backend: &B,
        store: &TaskStore,
        task_id: TaskId,
    ) -> Result<WorkSession, WorkSessionError<B::Error>> {
        let task = self.startable(store, task_id)?;
        if let Some(session) = self.current {
            return Err(PreconditionError::OtherTaskWorking {
                task_id: session.task_id,
            }
            .into());
        }
        if let Some(other) = store.find_working_task(Some(task_id)) {
            return Err(PreconditionError::OtherTaskWorking { task_id: other.id }.into());
        }
        if let Some(other) = persisted_working_task(backend, task_id)? {
            return Err(PreconditionError::OtherTaskWorking { task_id: other }.into());
        }
        self.launch(backend, task)
    }

    /// Closes the active slice of `task_id` and marks the task idle.
    ///
    /// Without a handle, recovery from `store` is attempted first. An idle
    /// task's orphaned open slice is closed the same way. Returns the closed
    /// slice ID.
    pub fn stop_work<B: WorkBackend>(
        &mut self,
        backend: &B,
        store: &TaskStore,
        task_id: TaskId,
        options: StopWorkOptions,
    ) -> Result<TimeSliceId, WorkSessionError<B::Error>> {
        let session = match self.current {
            Some(session) => session,
            None => {
                let task = store.get(task_id).ok_or(WorkSessionError::NotFound(task_id))?;
                match self.recover(backend, task)? {
                    Some(session) => session,
                    None => orphan_session(task)
                        .ok_or(PreconditionError::NoActiveSession(task_id))?,
                }
            }
        };
        if session.task_id != task_id {
            return Err(ConsistencyError::HandleMismatch {
                handle_task: session.task_id,
                requested: task_id,
            }
            .into());
        }

        let now = self.clock.now_ms();
        let (end_at, duration_ms) = if now < session.start_at {
            warn!(
                "event=work_stop module=work_session status=clamped task_id={task_id} slice_id={} skew_ms={}",
                session.slice_id,
                session.start_at - now
            );
            (session.start_at, 0)
        } else {
            (now, now - session.start_at)
        };
        let close = SliceClose {
            end_at,
            duration_ms,
            efficiency_score: options.efficiency_score.unwrap_or(self.default_score),
            note: options.note.unwrap_or_default(),
        };

        backend
            .close_slice(session.slice_id, close)
            .map_err(WorkSessionError::Backend)?;
        self.current = None;
        backend
            .set_execution_state(task_id, ExecutionState::Idle)
            .map_err(WorkSessionError::Backend)?;

        info!(
            "event=work_stop module=work_session status=ok task_id={task_id} slice_id={} duration_ms={duration_ms}",
            session.slice_id
        );
        Ok(session.slice_id)
    }

    /// Rebuilds the handle from a persisted working task.
    ///
    /// A working task without an open slice is set idle through `backend`
    /// and `None` is returned. Idle tasks yield `None` untouched.
    pub fn recover<B: WorkBackend>(
        &mut self,
        backend: &B,
        task: &Task,
    ) -> Result<Option<WorkSession>, WorkSessionError<B::Error>> {
        if !task.is_working() {
            return Ok(None);
        }
        match task.open_slice() {
            Some(slice) => {
                let session = WorkSession {
                    slice_id: slice.id,
                    start_at: slice.start_at,
                    task_id: task.id,
                };
                self.current = Some(session);
                info!(
                    "event=work_recover module=work_session status=ok task_id={} slice_id={}",
                    task.id, slice.id
                );
                Ok(Some(session))
            }
            None => {
                warn!(
                    "event=work_recover module=work_session status=drift task_id={} action=force_idle",
                    task.id
                );
                backend
                    .set_execution_state(task.id, ExecutionState::Idle)
                    .map_err(WorkSessionError::Backend)?;
                Ok(None)
            }
        }
    }

    /// Stops whichever task is working, then starts `task_id`.
    ///
    /// Returns the existing handle when `task_id` is already the active
    /// session. Preconditions on `task_id` are checked before anything stops.
    pub fn switch_to<B: WorkBackend>(
        &mut self,
        backend: &B,
        store: &TaskStore,
        task_id: TaskId,
    ) -> Result<WorkSession, WorkSessionError<B::Error>> {
        if let Some(session) = self.current {
            if session.task_id == task_id {
                return Ok(session);
            }
        }
        let task = self.startable(store, task_id)?;

        let other = match self.current {
            Some(session) => Some(session.task_id),
            None => store.find_working_task(Some(task_id)).map(|task| task.id),
        };
        if let Some(working) = persisted_working_task(backend, task_id)? {
            if other != Some(working) {
                return Err(PreconditionError::OtherTaskWorking { task_id: working }.into());
            }
        }
        if let Some(other) = other {
            self.stop_work(backend, store, other, StopWorkOptions::default())?;
        }
        self.launch(backend, task)
    }

    /// Checks every working/idle task of `store` against its slices.
    ///
    /// Run after each reload. Drift on working tasks is repaired. An orphaned
    /// open slice is adopted as the session when no other task works and its
    /// task may start; otherwise it is closed with zero duration. Further
    /// consistent working tasks are only reported.
    pub fn reconcile<B: WorkBackend>(
        &mut self,
        backend: &B,
        store: &TaskStore,
    ) -> Result<ReconcileReport, WorkSessionError<B::Error>> {
        let mut report = ReconcileReport::default();
        let mut orphans = Vec::new();

        for task in store.iter() {
            match execution_phase(task) {
                Ok(ExecutionPhase::Idle) => {}
                Ok(ExecutionPhase::Working { .. }) => {
                    if report.recovered.is_none() {
                        report.recovered = self.recover(backend, task)?;
                    } else {
                        warn!(
                            "event=work_reconcile module=work_session status=conflict task_id={}",
                            task.id
                        );
                        report.conflicting.push(task.id);
                    }
                }
                Err(ConsistencyError::Drift {
                    execution_state: ExecutionState::Working,
                    ..
                }) => {
                    self.recover(backend, task)?;
                    report.forced_idle.push(task.id);
                }
                Err(ConsistencyError::Drift {
                    open_slice: Some(slice_id),
                    ..
                }) => {
                    warn!(
                        "event=work_reconcile module=work_session status=orphan task_id={} slice_id={slice_id}",
                        task.id
                    );
                    report.orphaned.push((task.id, slice_id));
                    orphans.push(task);
                }
                Err(_) => {}
            }
        }

        if report.recovered.is_none() {
            if let Some(session) = self.current {
                let still_open = store
                    .get(session.task_id)
                    .and_then(Task::open_slice)
                    .is_some_and(|slice| slice.id == session.slice_id);
                if !still_open {
                    self.current = None;
                }
            }
        }

        for task in orphans {
            let Some(slice) = task.open_slice() else {
                continue;
            };
            // A handle on this slice means the flip to working failed earlier.
            let claims_handle = self
                .current
                .is_some_and(|session| session.slice_id == slice.id);
            let slot_free = (self.current.is_none() || claims_handle)
                && persisted_working_task(backend, task.id)?.is_none();
            let may_start =
                claims_handle || self.startable::<B::Error>(store, task.id).is_ok();
            if slot_free && may_start {
                report.recovered = Some(self.adopt(backend, task.id, slice)?);
            } else {
                self.close_orphan(backend, task.id, slice)?;
                report.closed_orphans.push(slice.id);
            }
        }
        Ok(report)
    }

    fn startable<'s, E>(
        &self,
        store: &'s TaskStore,
        task_id: TaskId,
    ) -> Result<&'s Task, WorkSessionError<E>> {
        let task = store.get(task_id).ok_or(WorkSessionError::NotFound(task_id))?;
        if task.status != TaskStatus::InProgress {
            return Err(PreconditionError::NotInProgress {
                task_id,
                status: task.status,
            }
            .into());
        }
        if is_locked(store, task, self.clock.now_ms()) {
            return Err(PreconditionError::Locked(task_id).into());
        }
        let handle_here = self.current.is_some_and(|session| session.task_id == task_id);
        if handle_here || (task.is_working() && task.open_slice().is_some()) {
            return Err(PreconditionError::AlreadyWorking(task_id).into());
        }
        Ok(task)
    }

    fn launch<B: WorkBackend>(
        &mut self,
        backend: &B,
        task: &Task,
    ) -> Result<WorkSession, WorkSessionError<B::Error>> {
        match task.open_slice() {
            Some(slice) => self.adopt(backend, task.id, slice),
            None => self.begin(backend, task.id),
        }
    }

    /// Finishes an interrupted start on an already persisted open slice.
    fn adopt<B: WorkBackend>(
        &mut self,
        backend: &B,
        task_id: TaskId,
        slice: &TimeSlice,
    ) -> Result<WorkSession, WorkSessionError<B::Error>> {
        let session = WorkSession {
            slice_id: slice.id,
            start_at: slice.start_at,
            task_id,
        };
        self.current = Some(session);
        backend
            .set_execution_state(task_id, ExecutionState::Working)
            .map_err(WorkSessionError::Backend)?;

        info!(
            "event=work_start module=work_session status=adopted task_id={task_id} slice_id={}",
            slice.id
        );
        Ok(session)
    }

    fn close_orphan<B: WorkBackend>(
        &self,
        backend: &B,
        task_id: TaskId,
        slice: &TimeSlice,
    ) -> Result<(), WorkSessionError<B::Error>> {
        let close = SliceClose {
            end_at: slice.start_at,
            duration_ms: 0,
            efficiency_score: self.default_score,
            note: String::new(),
        };
        backend
            .close_slice(slice.id, close)
            .map_err(WorkSessionError::Backend)?;
        warn!(
            "event=work_reconcile module=work_session status=orphan_closed task_id={task_id} slice_id={}",
            slice.id
        );
        Ok(())
    }

    fn begin<B: WorkBackend>(
        &mut self,
        backend: &B,
        task_id: TaskId,
    ) -> Result<WorkSession, WorkSessionError<B::Error>> {
        let slice = backend
            .create_open_slice(task_id, self.clock.now_ms())
            .map_err(WorkSessionError::Backend)?;
        let session = WorkSession {
            slice_id: slice.id,
            start_at: slice.start_at,
            task_id,
        };
        self.current = Some(session);
        backend
            .set_execution_state(task_id, ExecutionState::Working)
            .map_err(WorkSessionError::Backend)?;

        info!(
            "event=work_start module=work_session status=ok task_id={task_id} slice_id={}",
            slice.id
        );
        Ok(session)
    }
}

/// Handle for an idle task's leftover open slice.
fn orphan_session(task: &Task) -> Option<WorkSession> {
    if task.is_working() {
        return None;
    }
    task.open_slice().map(|slice| WorkSession {
        slice_id: slice.id,
        start_at: slice.start_at,
        task_id: task.id,
    })
}

fn persisted_working_task<B: WorkBackend>(
    backend: &B,
    exclude: TaskId,
) -> Result<Option<TaskId>, WorkSessionError<B::Error>> {
    backend
        .find_working_task(Some(exclude))
        .map_err(WorkSessionError::Backend)
}
