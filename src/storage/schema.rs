//! Database schema definitions
//!
//! This module contains the SQL schema of the record database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per harvested item
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    address TEXT,
    scraped_at TEXT NOT NULL,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_scraped_at ON records(scraped_at);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
