//! Time slice domain model.
//!
//! # Invariants
//! - A slice is open while `end_at` is `None`; open slices have no duration
//!   and no efficiency score.
//! - A slice is closed exactly once and never reopened.
//! - `efficiency_score` is within 1..=5 when set.

use crate::model::task::TaskId;
use crate::model::timestamp::{iso8601, iso8601_option, EpochMs};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable time slice identifier.
pub type TimeSliceId = Uuid;

pub const EFFICIENCY_MIN: u8 = 1;
pub const EFFICIENCY_MAX: u8 = 5;

/// One contiguous period of work on a single task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlice {
    pub id: TimeSliceId,
    pub task_id: TaskId,
    #[serde(with = "iso8601")]
    pub start_at: EpochMs,
    #[serde(with = "iso8601_option")]
    pub end_at: Option<EpochMs>,
    pub duration_ms: Option<i64>,
    /// Subjective focus rating, 1..=5.
    pub efficiency_score: Option<u8>,
    pub note: Option<String>,
    #[serde(with = "iso8601")]
    pub created_at: EpochMs,
    #[serde(with = "iso8601")]
    pub updated_at: EpochMs,
}

impl TimeSlice {
    /// Creates an open slice starting at `start_at`.
    pub fn open(task_id: TaskId, start_at: EpochMs) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            start_at,
            end_at: None,
            duration_ms: None,
            efficiency_score: None,
            note: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_at.is_none()
    }

    /// Returns `(duration_ms, efficiency_score)` when both are recorded.
    pub fn scored_duration(&self) -> Option<(i64, u8)> {
        match (self.duration_ms, self.efficiency_score) {
            (Some(duration), Some(score)) => Some((duration, score)),
            _ => None,
        }
    }

    /// Validates field-level invariants.
    pub fn validate(&self) -> Result<(), TimeSliceValidationError> {
        if let Some(score) = self.efficiency_score {
            if !(EFFICIENCY_MIN..=EFFICIENCY_MAX).contains(&score) {
                return Err(TimeSliceValidationError::EfficiencyOutOfRange(score));
            }
        }
        if let Some(duration) = self.duration_ms {
            if duration < 0 {
                return Err(TimeSliceValidationError::NegativeDuration(duration));
            }
        }
        if let Some(end_at) = self.end_at {
            if end_at < self.start_at {
                return Err(TimeSliceValidationError::EndBeforeStart {
                    start_at: self.start_at,
                    end_at,
                });
            }
        }
        Ok(())
    }
}

/// Field-level time slice validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeSliceValidationError {
    EfficiencyOutOfRange(u8),
    NegativeDuration(i64),
    EndBeforeStart { start_at: EpochMs, end_at: EpochMs },
}

impl Display for TimeSliceValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EfficiencyOutOfRange(score) => write!(
                f,
                "efficiency score {score} is outside {EFFICIENCY_MIN}..={EFFICIENCY_MAX}"
            ),
            Self::NegativeDuration(value) => {
                write!(f, "duration_ms must be non-negative, got {value}")
            }
            Self::EndBeforeStart { start_at, end_at } => {
                write!(f, "end_at {end_at} is earlier than start_at {start_at}")
            }
        }
    }
}

impl Error for TimeSliceValidationError {}

#[cfg(test)]
mod tests {
    use super::{TimeSlice, TimeSliceValidationError};
    use uuid::Uuid;

    #[test]
    fn open_slice_is_valid_and_unscored() {
        let slice = TimeSlice::open(Uuid::new_v4(), 1_000);
        assert!(slice.is_open());
        assert_eq!(slice.scored_duration(), None);
        assert!(slice.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_fields() {
        let mut slice = TimeSlice::open(Uuid::new_v4(), 1_000);
        slice.efficiency_score = Some(0);
        assert_eq!(
            slice.validate(),
            Err(TimeSliceValidationError::EfficiencyOutOfRange(0))
        );

        slice.efficiency_score = Some(5);
        slice.end_at = Some(500);
        assert!(matches!(
            slice.validate(),
            Err(TimeSliceValidationError::EndBeforeStart { .. })
        ));

        slice.end_at = Some(2_000);
        slice.duration_ms = Some(-1);
        assert_eq!(
            slice.validate(),
            Err(TimeSliceValidationError::NegativeDuration(-1))
        );
    }
}
