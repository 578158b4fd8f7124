//! Project repository contract and SQLite implementation.

use super::{parse_uuid, RepoError, RepoResult};
use crate::model::project::{Project, ProjectId};
use rusqlite::{params, Connection, Row};

const PROJECT_SELECT_SQL: &str = "SELECT
    id,
    name,
    description,
    planned_time_ms,
    start_at,
    end_at,
    created_at,
    updated_at
FROM projects";

const ENTITY: &str = "project";

/// Repository interface for project persistence.
pub trait ProjectRepository {
    fn create_project(&self, project: &Project) -> RepoResult<ProjectId>;
    fn update_project(&self, project: &Project) -> RepoResult<()>;
    fn get_project(&self, id: ProjectId) -> RepoResult<Option<Project>>;
    fn find_project_by_name(&self, name: &str) -> RepoResult<Option<Project>>;
    /// Newest first.
    fn list_projects(&self) -> RepoResult<Vec<Project>>;
    /// Deletes the project; tasks and slices cascade.
    fn delete_project(&self, id: ProjectId) -> RepoResult<()>;
}

/// SQLite-backed project repository.
pub struct SqliteProjectRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteProjectRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn query_one(&self, where_sql: &str, value: String) -> RepoResult<Option<Project>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{PROJECT_SELECT_SQL} {where_sql};"))?;
        let mut rows = stmt.query([value])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_project_row(row)?));
        }
        Ok(None)
    }
}

impl ProjectRepository for SqliteProjectRepository<'_> {
    fn create_project(&self, project: &Project) -> RepoResult<ProjectId> {
        self.conn.execute(
            "INSERT INTO projects (
                id,
                name,
                description,
                planned_time_ms,
                start_at,
                end_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                project.id.to_string(),
                project.name.as_str(),
                project.description.as_deref(),
                project.planned_time_ms,
                project.start_at,
                project.end_at,
            ],
        )?;
        Ok(project.id)
    }

    fn update_project(&self, project: &Project) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE projects
             SET name = ?2,
                 description = ?3,
                 planned_time_ms = ?4,
                 start_at = ?5,
                 end_at = ?6,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                project.id.to_string(),
                project.name.as_str(),
                project.description.as_deref(),
                project.planned_time_ms,
                project.start_at,
                project.end_at,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: ENTITY,
                id: project.id,
            });
        }
        Ok(())
    }

    fn get_project(&self, id: ProjectId) -> RepoResult<Option<Project>> {
        self.query_one("WHERE id = ?1", id.to_string())
    }

    fn find_project_by_name(&self, name: &str) -> RepoResult<Option<Project>> {
        self.query_one("WHERE name = ?1", name.to_string())
    }

    fn list_projects(&self) -> RepoResult<Vec<Project>> {
        let mut stmt = self.conn.prepare(&format!(
            "{PROJECT_SELECT_SQL} ORDER BY created_at DESC, rowid DESC;"
        ))?;
        let mut rows = stmt.query([])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_project_row(row)?);
        }
        Ok(items)
    }

    fn delete_project(&self, id: ProjectId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM projects WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound { entity: ENTITY, id });
        }
        Ok(())
    }
}

fn parse_project_row(row: &Row<'_>) -> RepoResult<Project> {
    let id_text: String = row.get("id")?;
    Ok(Project {
        id: parse_uuid(&id_text, "projects.id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        planned_time_ms: row.get("planned_time_ms")?,
        start_at: row.get("start_at")?,
        end_at: row.get("end_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
