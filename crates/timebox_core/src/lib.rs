//! Core domain logic for Timebox.
//! This crate is the single source of truth for task hierarchy rules,
//! time aggregation and the work-session lifecycle.

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, CoreConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use engine::metrics::{UsageBand, UsageStatus};
pub use engine::store::TaskStore;
pub use engine::visibility::{build_forest, ExpandedKeys, TaskNode};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::deleted_task::{DeletedTask, DeletedTaskId};
pub use model::project::{Project, ProjectId};
pub use model::task::{ExecutionState, Task, TaskId, TaskStatus};
pub use model::time_slice::{TimeSlice, TimeSliceId};
pub use model::timestamp::EpochMs;
pub use repo::{RepoError, RepoResult};
pub use service::backend::{BackendError, LocalBackend};
pub use service::work_session::{
    StopWorkOptions, WorkBackend, WorkSession, WorkSessionError, WorkSessionManager,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
