//! JSON file storage
//!
//! One pretty-printed `<id>.json` file per record in the output directory.
//! The scrape date of a stored record is read back from its `scrapDate` key.

use crate::storage::traits::{Record, RecordMeta, RecordStore, StorageError, StorageResult};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Key holding the scrape date inside a stored record
pub const SCRAPE_DATE_KEY: &str = "scrapDate";

/// Record store writing one JSON file per record
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    directory: PathBuf,
}

impl JsonFileStore {
    /// Opens a store in `directory`, creating it when missing
    pub fn new(directory: impl Into<PathBuf>) -> StorageResult<Self> {
        let directory = directory.into();
        if !directory.exists() {
            std::fs::create_dir_all(&directory)?;
            tracing::info!("Created output directory {}", directory.display());
        }
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_path(&self, id: &str) -> StorageResult<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(StorageError::InvalidId(id.to_string()));
        }
        Ok(self.directory.join(format!("{}.json", id)))
    }
}

impl RecordStore for JsonFileStore {
    fn existing(&self, id: &str) -> StorageResult<Option<RecordMeta>> {
        let path = self.record_path(id)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let stored: Value = serde_json::from_str(&content)?;
        let scraped_at = stored
            .get(SCRAPE_DATE_KEY)
            .and_then(Value::as_str)
            .and_then(|date| DateTime::parse_from_rfc3339(date).ok())
            .map(|date| date.with_timezone(&Utc));

        Ok(Some(RecordMeta {
            id: id.to_string(),
            scraped_at,
        }))
    }

    fn store(&self, record: &Record) -> StorageResult<()> {
        let path = self.record_path(&record.id)?;
        let json = serde_json::to_string_pretty(&record.data)?;
        std::fs::write(&path, json)?;
        tracing::trace!("Wrote {}", path.display());
        Ok(())
    }

    fn count(&self) -> StorageResult<usize> {
        let mut count = 0;
        for entry in std::fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                count += 1;
            }
        }
        Ok(count)
    }
}
