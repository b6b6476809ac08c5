//! Host blacklist loading
//!
//! The blacklist is read from a hosts-file style block list, the common
//! format of ad and tracker block lists:
//!
//! ```text
//! # Social and ads hosts
//! 0.0.0.0 www.facebook.com
//! 0.0.0.0 doubleclick.net
//! ```
//!
//! Only `0.0.0.0 <host>` lines contribute; the leading `www.` of the host is
//! stripped. Everything else is ignored.

use crate::HarvestError;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

fn host_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*0\.0\.0\.0\s+(?:www\.)?(\S+)\s*$").expect("valid blacklist regex")
    })
}

/// Immutable set of blocked hosts
#[derive(Debug, Clone, Default)]
pub struct Blacklist {
    hosts: HashSet<String>,
}

impl Blacklist {
    /// Creates an empty blacklist that blocks nothing
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses block list content
    pub fn parse(content: &str) -> Self {
        let hosts = content
            .lines()
            .filter_map(|line| host_line_re().captures(line))
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_lowercase())
            .collect();
        Self { hosts }
    }

    /// Reads and parses a block list file
    ///
    /// # Returns
    ///
    /// * `Ok(Blacklist)` - The parsed host set
    /// * `Err(HarvestError::Blacklist)` - The file could not be read
    pub async fn load(path: &Path) -> Result<Self, HarvestError> {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| HarvestError::Blacklist {
                    path: path.display().to_string(),
                    source,
                })?;
        let blacklist = Self::parse(&content);
        tracing::info!(
            "Loaded {} blacklisted hosts from {}",
            blacklist.len(),
            path.display()
        );
        Ok(blacklist)
    }

    /// Returns whether `domain` is blacklisted
    pub fn contains(&self, domain: &str) -> bool {
        self.hosts.contains(domain)
    }

    /// Number of hosts in the list
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Returns whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl FromIterator<String> for Blacklist {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            hosts: iter.into_iter().collect(),
        }
    }
}
