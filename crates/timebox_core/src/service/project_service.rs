//! Project use-case service.
//!
//! # Invariants
//! - Names are trimmed, non-blank and unique.
//! - `planned_time_ms` is never negative.
//! - `start_at <= end_at` whenever both are set.

use crate::config::DEFAULT_PROJECT_NAME;
use crate::model::project::{Project, ProjectId};
use crate::model::timestamp::EpochMs;
use crate::repo::project_repo::ProjectRepository;
use crate::repo::RepoError;
use log::info;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Input for [`ProjectService::create_project`].
#[derive(Debug, Clone, Default)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub planned_time_ms: Option<i64>,
    pub start_at: Option<EpochMs>,
    pub end_at: Option<EpochMs>,
}

impl NewProject {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Partial project update. Outer `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub planned_time_ms: Option<i64>,
    pub start_at: Option<Option<EpochMs>>,
    pub end_at: Option<Option<EpochMs>>,
}

#[derive(Debug)]
pub enum ProjectServiceError {
    InvalidName,
    DuplicateName(String),
    NegativePlannedTime(i64),
    InvalidSchedule { start_at: EpochMs, end_at: EpochMs },
    ProjectNotFound(ProjectId),
    Repo(RepoError),
}

impl Display for ProjectServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "project name must not be blank"),
            Self::DuplicateName(name) => write!(f, "project name already in use: {name}"),
            Self::NegativePlannedTime(value) => {
                write!(f, "planned_time_ms must be non-negative, got {value}")
            }
            Self::InvalidSchedule { start_at, end_at } => {
                write!(f, "project end_at {end_at} is earlier than start_at {start_at}")
            }
            Self::ProjectNotFound(id) => write!(f, "project not found: {id}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ProjectServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ProjectServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound {
                entity: "project",
                id,
            } => Self::ProjectNotFound(id),
            other => Self::Repo(other),
        }
    }
}

/// Project service facade.
pub struct ProjectService<R: ProjectRepository> {
    repo: R,
    default_name: String,
}

impl<R: ProjectRepository> ProjectService<R> {
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            default_name: DEFAULT_PROJECT_NAME.to_string(),
        }
    }

    /// Overrides the name used by [`Self::get_or_create_default_project`].
    pub fn with_default_name(mut self, name: impl Into<String>) -> Self {
        self.default_name = name.into();
        self
    }

    pub fn create_project(&self, input: NewProject) -> Result<Project, ProjectServiceError> {
        let name = normalize_name(&input.name)?;
        self.ensure_name_free(&name, None)?;

        let mut project = Project::new(name);
        project.description = input.description;
        project.planned_time_ms = input.planned_time_ms.unwrap_or(0);
        project.start_at = input.start_at;
        project.end_at = input.end_at;
        validate_plan(&project)?;

        let id = self.repo.create_project(&project)?;
        info!("event=project_create module=service status=ok project_id={id}");
        self.get_project(id)
    }

    pub fn get_project(&self, id: ProjectId) -> Result<Project, ProjectServiceError> {
        self.repo
            .get_project(id)?
            .ok_or(ProjectServiceError::ProjectNotFound(id))
    }

    pub fn list_projects(&self) -> Result<Vec<Project>, ProjectServiceError> {
        Ok(self.repo.list_projects()?)
    }

    pub fn update_project(
        &self,
        id: ProjectId,
        update: ProjectUpdate,
    ) -> Result<Project, ProjectServiceError> {
        let mut project = self.get_project(id)?;
        if let Some(name) = update.name {
            let name = normalize_name(&name)?;
            self.ensure_name_free(&name, Some(id))?;
            project.name = name;
        }
        if let Some(description) = update.description {
            project.description = description;
        }
        if let Some(planned) = update.planned_time_ms {
            project.planned_time_ms = planned;
        }
        if let Some(start_at) = update.start_at {
            project.start_at = start_at;
        }
        if let Some(end_at) = update.end_at {
            project.end_at = end_at;
        }
        validate_plan(&project)?;

        self.repo.update_project(&project)?;
        self.get_project(id)
    }

    /// Deletes the project with all of its tasks and slices.
    pub fn delete_project(&self, id: ProjectId) -> Result<(), ProjectServiceError> {
        self.repo.delete_project(id)?;
        info!("event=project_delete module=service status=ok project_id={id}");
        Ok(())
    }

    /// Returns the default project, creating it on first use.
    pub fn get_or_create_default_project(&self) -> Result<Project, ProjectServiceError> {
        if let Some(project) = self.repo.find_project_by_name(&self.default_name)? {
            return Ok(project);
        }
        self.create_project(NewProject::named(self.default_name.clone()))
    }

    fn ensure_name_free(
        &self,
        name: &str,
        current: Option<ProjectId>,
    ) -> Result<(), ProjectServiceError> {
        match self.repo.find_project_by_name(name)? {
            Some(existing) if Some(existing.id) != current => {
                Err(ProjectServiceError::DuplicateName(name.to_string()))
            }
            _ => Ok(()),
        }
    }
}

fn normalize_name(value: &str) -> Result<String, ProjectServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ProjectServiceError::InvalidName);
    }
    Ok(trimmed.to_string())
}

fn validate_plan(project: &Project) -> Result<(), ProjectServiceError> {
    if project.planned_time_ms < 0 {
        return Err(ProjectServiceError::NegativePlannedTime(
            project.planned_time_ms,
        ));
    }
    if let (Some(start_at), Some(end_at)) = (project.start_at, project.end_at) {
        if end_at < start_at {
            return Err(ProjectServiceError::InvalidSchedule { start_at, end_at });
        }
    }
    Ok(())
}
