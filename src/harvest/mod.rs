//! Harvest orchestration
//!
//! A harvest runs in dependent phases over one session pool:
//! - Discovery: read the last page number off the catalog root pager
//! - Listings: scrape every listing page for item references
//! - Details: scrape, enrich and store every referenced item

mod coordinator;
mod extractor;
mod progress;

pub use coordinator::{run_harvest, Harvester, RunReport};
pub use extractor::{PageExtractor, SelectorExtractor};
pub use progress::Progress;

use crate::HarvestError;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use thiserror::Error;
use url::Url;

/// Errors raised while reading structure out of a page
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Page structure not found: {0}")]
    StructureNotFound(String),

    #[error("Invalid link '{href}': {source}")]
    InvalidLink {
        href: String,
        source: url::ParseError,
    },
}

/// Reference to an item detail page, as found on a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailRef {
    pub address: Url,

    /// Display name, used in log lines
    pub name: String,
}

/// Stable storage id of the item at `address`
///
/// The last non-empty path segment with every character outside
/// `[A-Za-z0-9._-]` replaced by `_`. Addresses without a usable segment get
/// the hex SHA-256 digest of the full address.
pub fn item_id(address: &Url) -> String {
    let segment = address
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last());

    if let Some(segment) = segment {
        let id: String = segment
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if id.chars().any(|c| c.is_ascii_alphanumeric()) {
            return id;
        }
    }

    hex::encode(Sha256::digest(address.as_str().as_bytes()))
}

fn page_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(\d+)$").expect("valid page number regex"))
}

/// Expands the last listing page address into every listing page address
///
/// The page number is the trailing `/<n>` of the address; pages `1..=n` are
/// produced by substituting it.
pub fn listing_addresses(last_page: &Url) -> Result<Vec<Url>, HarvestError> {
    let address = last_page.as_str();
    let captures = page_number_re().captures(address).ok_or_else(|| {
        HarvestError::Discovery(format!("Could not find last page's number in {}", address))
    })?;

    let count: u32 = captures[1].parse().map_err(|_| {
        HarvestError::Discovery(format!("Could not parse last page's number in {}", address))
    })?;
    if count == 0 {
        return Err(HarvestError::Discovery(format!(
            "Last page number is zero in {}",
            address
        )));
    }

    let prefix = &address[..captures.get(0).map_or(address.len(), |m| m.start())];
    (1..=count)
        .map(|n| Url::parse(&format!("{}/{}", prefix, n)).map_err(HarvestError::from))
        .collect()
}
