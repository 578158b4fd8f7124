//! Task repository contract and SQLite implementation.
//!
//! # Invariants
//! - Loaded tasks always carry their own slices ordered by `start_at ASC`.
//! - `total_logged_ms` is derived from closed slices at load time.
//! - Listing is deterministic: `position ASC, created_at ASC, rowid ASC`.

use super::time_slice_repo::{insert_time_slice, load_slices_grouped};
use super::{bool_to_int, parse_bool, parse_optional_uuid, parse_uuid, RepoError, RepoResult};
use crate::model::project::ProjectId;
use crate::model::task::{ExecutionState, Task, TaskId, TaskStatus};
use rusqlite::{params, Connection, Row};

const TASK_SELECT_SQL: &str = "SELECT
    id,
    project_id,
    parent_id,
    title,
    description,
    priority,
    due_at,
    is_ddl,
    estimated_time_ms,
    status,
    execution_state,
    position,
    created_at,
    updated_at
FROM tasks";

const TASK_ORDER_SQL: &str = "ORDER BY position ASC, created_at ASC, rowid ASC";

const ENTITY: &str = "task";

/// Query options for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskListQuery {
    pub project_id: Option<ProjectId>,
}

/// Repository interface for task persistence.
pub trait TaskRepository {
    /// Inserts the task row and any slices it carries.
    fn create_task(&self, task: &Task) -> RepoResult<TaskId>;
    /// Rewrites every mutable column; slices are untouched.
    fn update_task(&self, task: &Task) -> RepoResult<()>;
    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>>;
    fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<Task>>;
    fn list_children(&self, parent_id: TaskId) -> RepoResult<Vec<Task>>;
    /// Tasks sharing the same project and parent, the task itself included.
    fn list_siblings(
        &self,
        project_id: ProjectId,
        parent_id: Option<TaskId>,
    ) -> RepoResult<Vec<Task>>;
    fn next_position(&self, project_id: ProjectId, parent_id: Option<TaskId>) -> RepoResult<i64>;
    fn find_working_task(&self, exclude: Option<TaskId>) -> RepoResult<Option<Task>>;
    fn set_position(&self, id: TaskId, position: i64) -> RepoResult<()>;
    /// Hard-deletes the row; children and slices cascade.
    fn delete_task(&self, id: TaskId) -> RepoResult<()>;
}

/// SQLite-backed task repository.
pub struct SqliteTaskRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaskRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn query_tasks(
        &self,
        where_sql: &str,
        bind: &[&dyn rusqlite::ToSql],
    ) -> RepoResult<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TASK_SELECT_SQL} {where_sql} {TASK_ORDER_SQL};"))?;
        let mut rows = stmt.query(bind)?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(parse_task_row(row)?);
        }

        let mut slices = load_slices_grouped(
            self.conn,
            &format!("WHERE task_id IN (SELECT id FROM tasks {where_sql})"),
            bind,
        )?;
        for task in &mut tasks {
            task.time_slices = slices.remove(&task.id).unwrap_or_default();
            task.total_logged_ms = task.closed_slices_total_ms();
        }
        Ok(tasks)
    }
}

impl TaskRepository for SqliteTaskRepository<'_> {
    fn create_task(&self, task: &Task) -> RepoResult<TaskId> {
        let tx = self.conn.unchecked_transaction()?;
        insert_task(&tx, task)?;
        tx.commit()?;
        Ok(task.id)
    }

    fn update_task(&self, task: &Task) -> RepoResult<()> {
        task.validate()?;

        let changed = self.conn.execute(
            "UPDATE tasks
             SET
                parent_id = ?2,
                title = ?3,
                description = ?4,
                priority = ?5,
                due_at = ?6,
                is_ddl = ?7,
                estimated_time_ms = ?8,
                status = ?9,
                execution_state = ?10,
                position = ?11,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                task.id.to_string(),
                task.parent_id.map(|value| value.to_string()),
                task.title.as_str(),
                task.description.as_deref(),
                task.priority,
                task.due_at,
                bool_to_int(task.is_ddl),
                task.estimated_time_ms,
                task.status.as_str(),
                task.execution_state.as_str(),
                task.position,
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: ENTITY,
                id: task.id,
            });
        }
        Ok(())
    }

    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        let id_text = id.to_string();
        Ok(self
            .query_tasks("WHERE id = ?1", &[&id_text])?
            .into_iter()
            .next())
    }

    fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<Task>> {
        match query.project_id {
            Some(project_id) => {
                let project_text = project_id.to_string();
                self.query_tasks("WHERE project_id = ?1", &[&project_text])
            }
            None => self.query_tasks("", &[]),
        }
    }

    fn list_children(&self, parent_id: TaskId) -> RepoResult<Vec<Task>> {
        let parent_text = parent_id.to_string();
        self.query_tasks("WHERE parent_id = ?1", &[&parent_text])
    }

    fn list_siblings(
        &self,
        project_id: ProjectId,
        parent_id: Option<TaskId>,
    ) -> RepoResult<Vec<Task>> {
        let project_text = project_id.to_string();
        match parent_id {
            Some(parent_id) => {
                let parent_text = parent_id.to_string();
                self.query_tasks(
                    "WHERE project_id = ?1 AND parent_id = ?2",
                    &[&project_text, &parent_text],
                )
            }
            None => self.query_tasks(
                "WHERE project_id = ?1 AND parent_id IS NULL",
                &[&project_text],
            ),
        }
    }

    fn next_position(&self, project_id: ProjectId, parent_id: Option<TaskId>) -> RepoResult<i64> {
        let next = self.conn.query_row(
            "SELECT COALESCE(MAX(position), -1) + 1
             FROM tasks
             WHERE project_id = ?1
               AND parent_id IS ?2;",
            params![
                project_id.to_string(),
                parent_id.map(|value| value.to_string()),
            ],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    fn find_working_task(&self, exclude: Option<TaskId>) -> RepoResult<Option<Task>> {
        let exclude_text = exclude.map(|value| value.to_string());
        Ok(self
            .query_tasks(
                "WHERE execution_state = 'working' AND (?1 IS NULL OR id <> ?1)",
                &[&exclude_text],
            )?
            .into_iter()
            .next())
    }

    fn set_position(&self, id: TaskId, position: i64) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE tasks
             SET position = ?2,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![id.to_string(), position],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound { entity: ENTITY, id });
        }
        Ok(())
    }

    fn delete_task(&self, id: TaskId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound { entity: ENTITY, id });
        }
        Ok(())
    }
}

/// Inserts one task row plus the slices it carries.
pub(crate) fn insert_task(conn: &Connection, task: &Task) -> RepoResult<()> {
    task.validate()?;

    conn.execute(
        "INSERT INTO tasks (
            id,
            project_id,
            parent_id,
            title,
            description,
            priority,
            due_at,
            is_ddl,
            estimated_time_ms,
            status,
            execution_state,
            position
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12);",
        params![
            task.id.to_string(),
            task.project_id.to_string(),
            task.parent_id.map(|value| value.to_string()),
            task.title.as_str(),
            task.description.as_deref(),
            task.priority,
            task.due_at,
            bool_to_int(task.is_ddl),
            task.estimated_time_ms,
            task.status.as_str(),
            task.execution_state.as_str(),
            task.position,
        ],
    )?;
    for slice in &task.time_slices {
        slice.validate()?;
        insert_time_slice(conn, slice)?;
    }

    Ok(())
}

fn parse_task_row(row: &Row<'_>) -> RepoResult<Task> {
    let id_text: String = row.get("id")?;
    let project_text: String = row.get("project_id")?;

    let status_text: String = row.get("status")?;
    let status = TaskStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid task status `{status_text}` in tasks.status"))
    })?;
    let state_text: String = row.get("execution_state")?;
    let execution_state = ExecutionState::parse(&state_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid execution state `{state_text}` in tasks.execution_state"
        ))
    })?;
    let priority_value: i64 = row.get("priority")?;
    let priority = u8::try_from(priority_value).map_err(|_| {
        RepoError::InvalidData(format!("invalid priority `{priority_value}` in tasks.priority"))
    })?;

    Ok(Task {
        id: parse_uuid(&id_text, "tasks.id")?,
        project_id: parse_uuid(&project_text, "tasks.project_id")?,
        parent_id: parse_optional_uuid(row.get("parent_id")?, "tasks.parent_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        priority,
        due_at: row.get("due_at")?,
        is_ddl: parse_bool(row.get("is_ddl")?, "tasks.is_ddl")?,
        estimated_time_ms: row.get("estimated_time_ms")?,
        status,
        execution_state,
        position: row.get("position")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        total_logged_ms: 0,
        time_slices: Vec::new(),
    })
}
