//! Storage traits and error types
//!
//! This module defines the trait interface for record stores and
//! associated error types.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid record id: '{0}'")]
    InvalidId(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One extracted item, ready to persist
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Stable identifier derived from the item address
    pub id: String,

    /// When the item was scraped
    pub scraped_at: DateTime<Utc>,

    /// The extracted fields, enrichment included
    pub data: Map<String, Value>,
}

/// What a store knows about an item it already holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMeta {
    pub id: String,

    /// Scrape date of the stored copy, when it carries one
    pub scraped_at: Option<DateTime<Utc>>,
}

/// Trait for record store implementations
///
/// Stores are shared by every concurrent detail task, so implementations
/// must handle their own synchronisation.
pub trait RecordStore: Send + Sync {
    /// Looks up a stored record
    ///
    /// # Arguments
    ///
    /// * `id` - The record id
    ///
    /// # Returns
    ///
    /// * `Ok(Some(RecordMeta))` - The record exists
    /// * `Ok(None)` - Nothing is stored under `id`
    fn existing(&self, id: &str) -> StorageResult<Option<RecordMeta>>;

    /// Writes a record, replacing any previous copy with the same id
    fn store(&self, record: &Record) -> StorageResult<()>;

    /// Number of stored records
    fn count(&self) -> StorageResult<usize>;
}
