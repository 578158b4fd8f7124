//! Domain model for projects, tasks, time slices and trash records.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Keep timestamps as epoch milliseconds inside the domain.
//!
//! # Invariants
//! - Every domain object is identified by a stable UUID.
//! - A task owns only its own time slices, never its descendants'.
//! - At most one task is `working` at any instant.

pub mod deleted_task;
pub mod project;
pub mod task;
pub mod time_slice;
pub mod timestamp;
