//! Repository layer: the local realization of the CRUD collaborator.
//!
//! # Responsibility
//! - Define per-entity data access contracts.
//! - Isolate SQLite query details from services and the engine.
//!
//! # Invariants
//! - Write paths validate records before SQL mutations.
//! - Read paths reject invalid persisted rows instead of masking them.
//! - Repository APIs return semantic `NotFound` in addition to DB errors.

pub mod kv_repo;
pub mod project_repo;
pub mod task_repo;
pub mod time_slice_repo;
pub mod trash_repo;

use crate::db::DbError;
use crate::model::task::TaskValidationError;
use crate::model::time_slice::TimeSliceValidationError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by every entity repository.
#[derive(Debug)]
pub enum RepoError {
    TaskValidation(TaskValidationError),
    TimeSliceValidation(TimeSliceValidationError),
    Db(DbError),
    NotFound { entity: &'static str, id: Uuid },
    InvalidData(String),
    Snapshot(serde_json::Error),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TaskValidation(err) => write!(f, "{err}"),
            Self::TimeSliceValidation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Snapshot(err) => write!(f, "snapshot encoding failed: {err}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::TaskValidation(err) => Some(err),
            Self::TimeSliceValidation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Snapshot(err) => Some(err),
            Self::NotFound { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<TaskValidationError> for RepoError {
    fn from(value: TaskValidationError) -> Self {
        Self::TaskValidation(value)
    }
}

impl From<TimeSliceValidationError> for RepoError {
    fn from(value: TimeSliceValidationError) -> Self {
        Self::TimeSliceValidation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Snapshot(value)
    }
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn parse_optional_uuid(
    value: Option<String>,
    column: &'static str,
) -> RepoResult<Option<Uuid>> {
    value.map(|text| parse_uuid(&text, column)).transpose()
}

pub(crate) fn parse_bool(value: i64, column: &'static str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}
