//! Project domain model.

use crate::model::timestamp::{iso8601, iso8601_option, EpochMs};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable project identifier.
pub type ProjectId = Uuid;

/// Top-level grouping of a task forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    /// Unique, trimmed display name.
    pub name: String,
    pub description: Option<String>,
    pub planned_time_ms: i64,
    #[serde(with = "iso8601_option")]
    pub start_at: Option<EpochMs>,
    #[serde(with = "iso8601_option")]
    pub end_at: Option<EpochMs>,
    #[serde(with = "iso8601")]
    pub created_at: EpochMs,
    #[serde(with = "iso8601")]
    pub updated_at: EpochMs,
}

impl Project {
    /// Creates a project with a generated ID and no plan.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            planned_time_ms: 0,
            start_at: None,
            end_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }
}
