//! Catalog-Harvest: a pooled-session catalog scraper
//!
//! This crate extracts structured records from a paginated catalog site. It
//! drives a bounded pool of page sessions through two fan-out phases (listing
//! pages, then detail pages), retrying transient failures and filtering
//! unwanted sub-resource traffic on every session.

pub mod config;
pub mod filter;
pub mod harvest;
pub mod retry;
pub mod session;
pub mod storage;

use thiserror::Error;

/// Main error type for Catalog-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog discovery failed: {0}")]
    Discovery(String),

    #[error("Navigation to {url} failed: {source}")]
    Navigation {
        url: String,
        source: session::SessionError,
    },

    #[error("Extraction failed for {url}: {source}")]
    Extract {
        url: String,
        source: harvest::ExtractError,
    },

    #[error("Session error: {0}")]
    Session(#[from] session::SessionError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Failed to load blacklist {path}: {source}")]
    Blacklist {
        path: String,
        source: std::io::Error,
    },

    #[error("Session pool is shut down")]
    PoolClosed,

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid CSS selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("Invalid update cutoff '{0}' (expected 'never', 'always', RFC 3339 or YYYY-MM-DD)")]
    InvalidUpdate(String),
}

/// Result type alias for Catalog-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use harvest::{Harvester, RunReport};
pub use session::{PooledSession, SessionPool};
