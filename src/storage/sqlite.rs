//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the RecordStore trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Record, RecordMeta, RecordStore, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite record store
///
/// Records are kept as serialized JSON next to their id, address and scrape
/// date.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Creates a new SqliteStore instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
    }
}

impl RecordStore for SqliteStore {
    fn existing(&self, id: &str) -> StorageResult<Option<RecordMeta>> {
        let conn = self.conn()?;
        let scraped_at: Option<String> = conn
            .query_row(
                "SELECT scraped_at FROM records WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(scraped_at.map(|date| RecordMeta {
            id: id.to_string(),
            scraped_at: DateTime::parse_from_rfc3339(&date)
                .ok()
                .map(|d| d.with_timezone(&Utc)),
        }))
    }

    fn store(&self, record: &Record) -> StorageResult<()> {
        let data = serde_json::to_string(&record.data)?;
        let address = record.data.get("address").and_then(|v| v.as_str());

        self.conn()?.execute(
            "INSERT INTO records (id, address, scraped_at, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                address = excluded.address,
                scraped_at = excluded.scraped_at,
                data = excluded.data",
            params![record.id, address, record.scraped_at.to_rfc3339(), data],
        )?;
        Ok(())
    }

    fn count(&self) -> StorageResult<usize> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
