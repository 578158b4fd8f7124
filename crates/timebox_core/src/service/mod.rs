//! Core use-case services.
//!
//! # Responsibility
//! - Enforce cross-entity rules above the repository layer.
//! - Expose the CRUD contract the work-session manager drives (`LocalBackend`).
//! - Own the in-memory work-session handle (`work_session`).

pub mod backend;
pub mod project_service;
pub mod task_service;
pub mod time_slice_service;
pub mod work_session;
