//! String-keyed blob storage for client-side UI state.
//!
//! # Responsibility
//! - Abstract "get/set a JSON blob by key" away from any storage medium.
//! - Provide SQLite (`ui_state` table) and in-memory implementations.
//!
//! # Invariants
//! - Values are opaque strings; callers own encoding and decoding.

use crate::db::DbError;
use rusqlite::{params, Connection, OptionalExtension};
use std::cell::RefCell;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Key-value storage failure.
#[derive(Debug)]
pub enum KvError {
    Db(DbError),
    Unavailable(String),
}

impl Display for KvError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Unavailable(message) => write!(f, "key-value storage unavailable: {message}"),
        }
    }
}

impl Error for KvError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Unavailable(_) => None,
        }
    }
}

impl From<rusqlite::Error> for KvError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Minimal key-value contract.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    fn set(&self, key: &str, value: &str) -> Result<(), KvError>;
}

/// `ui_state`-table backed store.
pub struct SqliteKvStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteKvStore<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl KeyValueStore for SqliteKvStore<'_> {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let value = self
            .conn
            .query_row(
                "SELECT state_value FROM ui_state WHERE state_key = ?1;",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.conn.execute(
            "INSERT INTO ui_state (state_key, state_value)
             VALUES (?1, ?2)
             ON CONFLICT(state_key) DO UPDATE SET
                state_value = excluded.state_value,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![key, value],
        )?;
        Ok(())
    }
}

/// Process-local store, mostly for tests and headless callers.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RefCell<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for &T {
    fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), KvError> {
        (**self).set(key, value)
    }
}
