//! Time slice repository contract and SQLite implementation.
//!
//! # Invariants
//! - Per-task listing is ordered `start_at ASC`; global listing `start_at DESC`.
//! - Overlap checks only consider closed slices.

use super::{parse_uuid, RepoError, RepoResult};
use crate::model::task::TaskId;
use crate::model::time_slice::{TimeSlice, TimeSliceId};
use crate::model::timestamp::EpochMs;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

pub(crate) const TIME_SLICE_SELECT_SQL: &str = "SELECT
    id,
    task_id,
    start_at,
    end_at,
    duration_ms,
    efficiency_score,
    note,
    created_at,
    updated_at
FROM time_slices";

const ENTITY: &str = "time slice";

/// Query options for listing time slices.
#[derive(Debug, Clone, Default)]
pub struct TimeSliceListQuery {
    pub task_id: Option<TaskId>,
}

/// Repository interface for time slice persistence.
pub trait TimeSliceRepository {
    fn create_time_slice(&self, slice: &TimeSlice) -> RepoResult<TimeSliceId>;
    fn update_time_slice(&self, slice: &TimeSlice) -> RepoResult<()>;
    fn get_time_slice(&self, id: TimeSliceId) -> RepoResult<Option<TimeSlice>>;
    fn list_time_slices(&self, query: &TimeSliceListQuery) -> RepoResult<Vec<TimeSlice>>;
    fn delete_time_slice(&self, id: TimeSliceId) -> RepoResult<()>;
    /// Returns the task's open slice, if any.
    fn find_open_slice(&self, task_id: TaskId) -> RepoResult<Option<TimeSlice>>;
    /// Whether `[start_at, end_at]` overlaps another closed slice of the task.
    fn has_overlap(
        &self,
        task_id: TaskId,
        start_at: EpochMs,
        end_at: EpochMs,
        exclude: Option<TimeSliceId>,
    ) -> RepoResult<bool>;
}

/// SQLite-backed time slice repository.
pub struct SqliteTimeSliceRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTimeSliceRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl TimeSliceRepository for SqliteTimeSliceRepository<'_> {
    fn create_time_slice(&self, slice: &TimeSlice) -> RepoResult<TimeSliceId> {
        slice.validate()?;
        insert_time_slice(self.conn, slice)?;
        Ok(slice.id)
    }

    fn update_time_slice(&self, slice: &TimeSlice) -> RepoResult<()> {
        slice.validate()?;
        let changed = self.conn.execute(
            "UPDATE time_slices
             SET start_at = ?2,
                 end_at = ?3,
                 duration_ms = ?4,
                 efficiency_score = ?5,
                 note = ?6,
                 updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                slice.id.to_string(),
                slice.start_at,
                slice.end_at,
                slice.duration_ms,
                slice.efficiency_score,
                slice.note.as_deref(),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                entity: ENTITY,
                id: slice.id,
            });
        }
        Ok(())
    }

    fn get_time_slice(&self, id: TimeSliceId) -> RepoResult<Option<TimeSlice>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TIME_SLICE_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_time_slice_row(row)?));
        }
        Ok(None)
    }

    fn list_time_slices(&self, query: &TimeSliceListQuery) -> RepoResult<Vec<TimeSlice>> {
        let mut items = Vec::new();
        match query.task_id {
            Some(task_id) => {
                let mut stmt = self.conn.prepare(&format!(
                    "{TIME_SLICE_SELECT_SQL} WHERE task_id = ?1 ORDER BY start_at ASC, rowid ASC;"
                ))?;
                let mut rows = stmt.query([task_id.to_string()])?;
                while let Some(row) = rows.next()? {
                    items.push(parse_time_slice_row(row)?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "{TIME_SLICE_SELECT_SQL} ORDER BY start_at DESC, rowid DESC;"
                ))?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    items.push(parse_time_slice_row(row)?);
                }
            }
        }
        Ok(items)
    }

    fn delete_time_slice(&self, id: TimeSliceId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM time_slices WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound { entity: ENTITY, id });
        }
        Ok(())
    }

    fn find_open_slice(&self, task_id: TaskId) -> RepoResult<Option<TimeSlice>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TIME_SLICE_SELECT_SQL}
             WHERE task_id = ?1 AND end_at IS NULL
             ORDER BY start_at DESC
             LIMIT 1;"
        ))?;
        let mut rows = stmt.query([task_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_time_slice_row(row)?));
        }
        Ok(None)
    }

    fn has_overlap(
        &self,
        task_id: TaskId,
        start_at: EpochMs,
        end_at: EpochMs,
        exclude: Option<TimeSliceId>,
    ) -> RepoResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1
                 FROM time_slices
                 WHERE task_id = ?1
                   AND end_at IS NOT NULL
                   AND (?4 IS NULL OR id <> ?4)
                   AND (
                     (start_at <= ?2 AND end_at > ?2)
                     OR (start_at < ?3 AND end_at >= ?3)
                     OR (start_at >= ?2 AND end_at <= ?3)
                   )
                 LIMIT 1;",
                params![
                    task_id.to_string(),
                    start_at,
                    end_at,
                    exclude.map(|id| id.to_string()),
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

pub(crate) fn insert_time_slice(conn: &Connection, slice: &TimeSlice) -> RepoResult<()> {
    conn.execute(
        "INSERT INTO time_slices (
            id,
            task_id,
            start_at,
            end_at,
            duration_ms,
            efficiency_score,
            note
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
        params![
            slice.id.to_string(),
            slice.task_id.to_string(),
            slice.start_at,
            slice.end_at,
            slice.duration_ms,
            slice.efficiency_score,
            slice.note.as_deref(),
        ],
    )?;
    Ok(())
}

/// Loads slices for many tasks at once, keyed by task and ordered by start.
pub(crate) fn load_slices_grouped(
    conn: &Connection,
    where_sql: &str,
    bind: &[&dyn rusqlite::ToSql],
) -> RepoResult<HashMap<TaskId, Vec<TimeSlice>>> {
    let mut stmt = conn.prepare(&format!(
        "{TIME_SLICE_SELECT_SQL} {where_sql} ORDER BY start_at ASC, rowid ASC;"
    ))?;
    let mut rows = stmt.query(bind)?;
    let mut grouped: HashMap<TaskId, Vec<TimeSlice>> = HashMap::new();
    while let Some(row) = rows.next()? {
        let slice = parse_time_slice_row(row)?;
        grouped.entry(slice.task_id).or_default().push(slice);
    }
    Ok(grouped)
}

pub(crate) fn parse_time_slice_row(row: &Row<'_>) -> RepoResult<TimeSlice> {
    let id_text: String = row.get("id")?;
    let task_id_text: String = row.get("task_id")?;
    let efficiency_score = row
        .get::<_, Option<i64>>("efficiency_score")?
        .map(|value| {
            u8::try_from(value).map_err(|_| {
                RepoError::InvalidData(format!(
                    "invalid efficiency score `{value}` in time_slices.efficiency_score"
                ))
            })
        })
        .transpose()?;

    Ok(TimeSlice {
        id: parse_uuid(&id_text, "time_slices.id")?,
        task_id: parse_uuid(&task_id_text, "time_slices.task_id")?,
        start_at: row.get("start_at")?,
        end_at: row.get("end_at")?,
        duration_ms: row.get("duration_ms")?,
        efficiency_score,
        note: row.get("note")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
