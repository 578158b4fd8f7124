//! Trash repository: persisted `DeletedTask` snapshots.
//!
//! Snapshots and metadata are stored as JSON text columns.

use super::task_repo::insert_task;
use super::{parse_uuid, RepoError, RepoResult};
use crate::model::deleted_task::{DeletedTask, DeletedTaskId};
use crate::model::task::Task;
use crate::model::timestamp::EpochMs;
use rusqlite::{params, Connection, Row};

const TRASH_SELECT_SQL: &str = "SELECT
    id,
    task_id,
    deleted_at,
    expiry_at,
    snapshot,
    deletion_metadata
FROM deleted_tasks";

const ENTITY: &str = "deleted task";

/// Repository interface for trash records.
pub trait TrashRepository {
    fn insert_deleted_task(&self, record: &DeletedTask) -> RepoResult<DeletedTaskId>;
    /// Writes `record` and hard-deletes `record.task_id` in one transaction.
    fn move_to_trash(&self, record: &DeletedTask) -> RepoResult<()>;
    /// Inserts `tasks` (parents before children) and drops the record, atomically.
    fn restore_tasks(&self, id: DeletedTaskId, tasks: &[Task]) -> RepoResult<()>;
    /// Unexpired records, newest deletion first.
    fn list_active(&self, now_ms: EpochMs) -> RepoResult<Vec<DeletedTask>>;
    fn get_deleted_task(&self, id: DeletedTaskId) -> RepoResult<Option<DeletedTask>>;
    fn delete_deleted_task(&self, id: DeletedTaskId) -> RepoResult<()>;
    /// Removes every record and returns how many were removed.
    fn delete_all(&self) -> RepoResult<usize>;
    /// Removes records with `expiry_at <= now_ms`.
    fn delete_expired(&self, now_ms: EpochMs) -> RepoResult<usize>;
}

/// SQLite-backed trash repository.
pub struct SqliteTrashRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTrashRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl TrashRepository for SqliteTrashRepository<'_> {
    fn insert_deleted_task(&self, record: &DeletedTask) -> RepoResult<DeletedTaskId> {
        insert_record(self.conn, record)?;
        Ok(record.id)
    }

    fn move_to_trash(&self, record: &DeletedTask) -> RepoResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        insert_record(&tx, record)?;
        let changed = tx.execute(
            "DELETE FROM tasks WHERE id = ?1;",
            [record.task_id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: "task",
                id: record.task_id,
            });
        }
        tx.commit()?;
        Ok(())
    }

    fn restore_tasks(&self, id: DeletedTaskId, tasks: &[Task]) -> RepoResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        let changed = tx.execute("DELETE FROM deleted_tasks WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound { entity: ENTITY, id });
        }
        for task in tasks {
            insert_task(&tx, task)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list_active(&self, now_ms: EpochMs) -> RepoResult<Vec<DeletedTask>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TRASH_SELECT_SQL}
             WHERE expiry_at > ?1
             ORDER BY deleted_at DESC, rowid DESC;"
        ))?;
        let mut rows = stmt.query([now_ms])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(parse_deleted_task_row(row)?);
        }
        Ok(items)
    }

    fn get_deleted_task(&self, id: DeletedTaskId) -> RepoResult<Option<DeletedTask>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TRASH_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_deleted_task_row(row)?));
        }
        Ok(None)
    }

    fn delete_deleted_task(&self, id: DeletedTaskId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM deleted_tasks WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound { entity: ENTITY, id });
        }
        Ok(())
    }

    fn delete_all(&self) -> RepoResult<usize> {
        Ok(self.conn.execute("DELETE FROM deleted_tasks;", [])?)
    }

    fn delete_expired(&self, now_ms: EpochMs) -> RepoResult<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM deleted_tasks WHERE expiry_at <= ?1;", [now_ms])?)
    }
}

fn insert_record(conn: &Connection, record: &DeletedTask) -> RepoResult<()> {
    let snapshot = serde_json::to_string(&record.snapshot)?;
    let metadata = serde_json::to_string(&record.metadata)?;
    conn.execute(
        "INSERT INTO deleted_tasks (
            id,
            task_id,
            deleted_at,
            expiry_at,
            snapshot,
            deletion_metadata
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        params![
            record.id.to_string(),
            record.task_id.to_string(),
            record.deleted_at,
            record.expiry_at,
            snapshot,
            metadata,
        ],
    )?;
    Ok(())
}

fn parse_deleted_task_row(row: &Row<'_>) -> RepoResult<DeletedTask> {
    let id_text: String = row.get("id")?;
    let task_id_text: String = row.get("task_id")?;
    let snapshot_text: String = row.get("snapshot")?;
    let metadata_text: String = row.get("deletion_metadata")?;

    Ok(DeletedTask {
        id: parse_uuid(&id_text, "deleted_tasks.id")?,
        task_id: parse_uuid(&task_id_text, "deleted_tasks.task_id")?,
        deleted_at: row.get("deleted_at")?,
        expiry_at: row.get("expiry_at")?,
        snapshot: serde_json::from_str(&snapshot_text).map_err(|err| {
            RepoError::InvalidData(format!("invalid snapshot in deleted_tasks.snapshot: {err}"))
        })?,
        metadata: serde_json::from_str(&metadata_text).map_err(|err| {
            RepoError::InvalidData(format!(
                "invalid metadata in deleted_tasks.deletion_metadata: {err}"
            ))
        })?,
    })
}
