use crate::filter::ResourceKind;
use crate::storage::UpdatePolicy;
use crate::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use url::Url;

/// Main configuration structure for Catalog-Harvest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// The catalog root address
    pub fn catalog_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.harvest.catalog_url).map_err(|e| {
            ConfigError::InvalidUrl(format!(
                "Invalid catalog-url '{}': {}",
                self.harvest.catalog_url, e
            ))
        })
    }
}

/// Harvest behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    /// Root page of the catalog; carries the pager
    #[serde(rename = "catalog-url")]
    pub catalog_url: String,

    /// Maximum number of live sessions
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Extra navigation attempts per acquisition
    #[serde(rename = "navigation-retry", default = "default_navigation_retry")]
    pub navigation_retry: u32,

    /// Extra attempts per listing or detail page
    #[serde(rename = "scraping-retry", default = "default_scraping_retry")]
    pub scraping_retry: u32,

    /// Abort the run on the first item that fails for good
    #[serde(rename = "fail-fast", default)]
    pub fail_fast: bool,

    /// Stop after the listing phase
    #[serde(rename = "discovery-only", default)]
    pub discovery_only: bool,

    /// Width of the sliding window used for the rate estimate (seconds)
    #[serde(rename = "progress-window-secs", default = "default_progress_window")]
    pub progress_window_secs: u64,

    /// Pause before reading the pager of the catalog root (milliseconds)
    #[serde(rename = "settle-delay-ms", default)]
    pub settle_delay_ms: u64,
}

/// Session backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(rename = "user-agent", default = "default_user_agent")]
    pub user_agent: String,

    #[serde(rename = "navigation-timeout-secs", default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,

    /// Sub-resource categories never loaded
    #[serde(rename = "blocked-resources", default = "default_blocked_resources")]
    pub blocked_resources: Vec<ResourceKind>,

    /// Hosts file (`0.0.0.0 host` lines) of blacklisted domains
    #[serde(rename = "blacklist-path", default)]
    pub blacklist_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            navigation_timeout_secs: default_navigation_timeout(),
            blocked_resources: default_blocked_resources(),
            blacklist_path: None,
        }
    }
}

/// CSS selectors locating the catalog structure
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    /// Link to the last listing page, inside the pager
    #[serde(rename = "pager-last-link")]
    pub pager_last_link: String,

    /// Item links on a listing page
    #[serde(rename = "listing-links")]
    pub listing_links: String,

    /// Element that must exist on a fully loaded detail page
    #[serde(rename = "detail-root", default = "default_detail_root")]
    pub detail_root: String,

    /// Item title on a detail page
    #[serde(rename = "detail-title")]
    pub detail_title: String,

    /// Extra fields: record key -> selector
    #[serde(rename = "detail-fields", default)]
    pub detail_fields: BTreeMap<String, String>,
}

/// Record persistence backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputBackend {
    #[default]
    Json,
    Sqlite,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub backend: OutputBackend,

    /// Directory of the JSON records
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,

    /// Path to the SQLite database file
    #[serde(rename = "database-path", default = "default_database_path")]
    pub database_path: PathBuf,

    /// `never`, `always`, or a cutoff date
    #[serde(default = "default_update")]
    pub update: String,
}

impl OutputConfig {
    pub fn update_policy(&self) -> Result<UpdatePolicy, ConfigError> {
        self.update.parse()
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            backend: OutputBackend::default(),
            directory: default_output_directory(),
            database_path: default_database_path(),
            update: default_update(),
        }
    }
}

fn default_concurrency() -> usize {
    20
}

fn default_navigation_retry() -> u32 {
    3
}

fn default_scraping_retry() -> u32 {
    1
}

fn default_progress_window() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

fn default_navigation_timeout() -> u64 {
    120
}

fn default_blocked_resources() -> Vec<ResourceKind> {
    ResourceKind::default_blocked()
}

fn default_detail_root() -> String {
    "body".to_string()
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("./out")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./out/records.db")
}

fn default_update() -> String {
    "never".to_string()
}
