//! Storage module for persisting harvested records
//!
//! This module handles everything written to disk by a harvest:
//! - The `RecordStore` trait and its JSON file and SQLite backends
//! - The update policy deciding whether a stored item is fetched again

mod freshness;
mod json;
mod schema;
mod sqlite;
mod traits;

pub use freshness::UpdatePolicy;
pub use json::{JsonFileStore, SCRAPE_DATE_KEY};
pub use sqlite::SqliteStore;
pub use traits::{Record, RecordMeta, RecordStore, StorageError, StorageResult};

use crate::config::{OutputBackend, OutputConfig};
use std::sync::Arc;

/// Opens the record store selected by the output configuration
///
/// # Arguments
///
/// * `config` - Output configuration
///
/// # Returns
///
/// * `Ok(Arc<dyn RecordStore>)` - Store ready for writing
/// * `Err(StorageError)` - Failed to create the directory or open the database
pub fn open_store(config: &OutputConfig) -> StorageResult<Arc<dyn RecordStore>> {
    match config.backend {
        OutputBackend::Json => Ok(Arc::new(JsonFileStore::new(&config.directory)?)),
        OutputBackend::Sqlite => Ok(Arc::new(SqliteStore::new(&config.database_path)?)),
    }
}
