//! Update policy for records that already exist

use crate::storage::traits::RecordMeta;
use crate::ConfigError;
use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;
use std::str::FromStr;

/// Decides whether an already stored item is fetched again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Stored items are never fetched again
    #[default]
    Never,

    /// Every item is fetched
    Always,

    /// Items scraped before the cutoff are fetched again
    Before(DateTime<Utc>),
}

impl UpdatePolicy {
    /// Returns true when the item described by `existing` can be skipped
    ///
    /// A stored record without a readable scrape date counts as fresh.
    pub fn should_skip(&self, existing: Option<&RecordMeta>) -> bool {
        let Some(meta) = existing else {
            return false;
        };
        match self {
            UpdatePolicy::Never => true,
            UpdatePolicy::Always => false,
            UpdatePolicy::Before(cutoff) => match meta.scraped_at {
                Some(scraped_at) => scraped_at >= *cutoff,
                None => true,
            },
        }
    }
}

impl FromStr for UpdatePolicy {
    type Err = ConfigError;

    /// Parses `never`, `always`, an RFC 3339 timestamp or a `YYYY-MM-DD` date
    /// (midnight UTC)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_ascii_lowercase().as_str() {
            "never" | "" => return Ok(UpdatePolicy::Never),
            "always" => return Ok(UpdatePolicy::Always),
            _ => {}
        }

        if let Ok(date) = DateTime::parse_from_rfc3339(value) {
            return Ok(UpdatePolicy::Before(date.with_timezone(&Utc)));
        }

        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|midnight| UpdatePolicy::Before(midnight.and_utc()))
            .ok_or_else(|| ConfigError::InvalidUpdate(value.to_string()))
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePolicy::Never => f.write_str("never"),
            UpdatePolicy::Always => f.write_str("always"),
            UpdatePolicy::Before(cutoff) => write!(f, "before {}", cutoff.to_rfc3339()),
        }
    }
}
