//! Core runtime configuration.
//!
//! # Responsibility
//! - Carry tunables shared by services, logging and the tree tracker.
//! - Load them from JSON with per-field defaults.
//!
//! # Invariants
//! - A config that passed [`CoreConfig::validate`] never yields a zero
//!   retention window or an out-of-range default score.

use crate::engine::visibility::DEFAULT_EXPANDED_KEYS_STORAGE_KEY;
use crate::logging::{default_log_level, parse_level};
use crate::model::time_slice::{EFFICIENCY_MAX, EFFICIENCY_MIN};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

pub const DEFAULT_PROJECT_NAME: &str = "Default Project";
pub const DEFAULT_TRASH_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_EFFICIENCY_SCORE: u8 = 3;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub log_level: String,
    /// Days a deleted task stays restorable.
    pub trash_retention_days: u32,
    /// Score recorded when a work session stops without one.
    pub default_efficiency_score: u8,
    pub expanded_keys_storage_key: String,
    pub default_project_name: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level().to_string(),
            trash_retention_days: DEFAULT_TRASH_RETENTION_DAYS,
            default_efficiency_score: DEFAULT_EFFICIENCY_SCORE,
            expanded_keys_storage_key: DEFAULT_EXPANDED_KEYS_STORAGE_KEY.to_string(),
            default_project_name: DEFAULT_PROJECT_NAME.to_string(),
        }
    }
}

impl CoreConfig {
    /// Parses and validates a JSON document; missing fields take defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_level(&self.log_level).map_err(ConfigError::Invalid)?;
        if self.trash_retention_days == 0 {
            return Err(ConfigError::Invalid(
                "trash_retention_days must be at least 1".to_string(),
            ));
        }
        if !(EFFICIENCY_MIN..=EFFICIENCY_MAX).contains(&self.default_efficiency_score) {
            return Err(ConfigError::Invalid(format!(
                "default_efficiency_score must be within {EFFICIENCY_MIN}..={EFFICIENCY_MAX}, got {}",
                self.default_efficiency_score
            )));
        }
        if self.expanded_keys_storage_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "expanded_keys_storage_key cannot be blank".to_string(),
            ));
        }
        if self.default_project_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "default_project_name cannot be blank".to_string(),
            ));
        }
        Ok(())
    }

    pub fn trash_retention_ms(&self) -> i64 {
        i64::from(self.trash_retention_days) * MS_PER_DAY
    }
}

/// Configuration loading failure.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}
