//! Sub-resource request filtering
//!
//! Every session gets a [`RequestFilter`] installed when it is opened. The
//! filter classifies each sub-resource request a loaded page would make and
//! blocks the ones the harvest never needs: heavy resource categories, image
//! files, and requests to blacklisted (social, ads, tracking) hosts.
//!
//! Classification is purely in-memory; the blacklist is fully loaded before
//! the first session is opened.

mod blacklist;
mod domain;

pub use blacklist::Blacklist;
pub use domain::request_domain;

use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Category of a sub-resource request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    Xhr,
    Other,
}

impl ResourceKind {
    /// The categories blocked when the configuration does not say otherwise
    pub fn default_blocked() -> Vec<ResourceKind> {
        vec![
            ResourceKind::Image,
            ResourceKind::Font,
            ResourceKind::Media,
            ResourceKind::Stylesheet,
            ResourceKind::Script,
        ]
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Document => "document",
            Self::Stylesheet => "stylesheet",
            Self::Image => "image",
            Self::Media => "media",
            Self::Font => "font",
            Self::Script => "script",
            Self::Xhr => "xhr",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// An outgoing sub-resource request observed on a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRequest {
    /// Target address, absolute or scheme-less
    pub url: String,
    pub kind: ResourceKind,
}

impl SubRequest {
    pub fn new(url: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            url: url.into(),
            kind,
        }
    }
}

/// Why a request was blocked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    ResourceKind(ResourceKind),
    ImageExtension,
    Blacklisted(String),
}

/// Outcome of classifying a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block(BlockReason),
}

impl Decision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Decision::Block(_))
    }
}

fn image_extension_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[^?#]+\.(?:png|jpe?g|gif)(?:[?#].*)?$").expect("valid image regex")
    })
}

/// Per-session request classifier
#[derive(Debug, Clone)]
pub struct RequestFilter {
    blacklist: Arc<Blacklist>,
    blocked_kinds: HashSet<ResourceKind>,
}

impl RequestFilter {
    /// Creates a filter from a shared blacklist and the blocked categories
    pub fn new(blacklist: Arc<Blacklist>, blocked_kinds: HashSet<ResourceKind>) -> Self {
        Self {
            blacklist,
            blocked_kinds,
        }
    }

    /// A filter that lets everything through
    pub fn allow_all() -> Self {
        Self::new(Arc::new(Blacklist::empty()), HashSet::new())
    }

    /// Classifies a sub-resource request
    ///
    /// A request is blocked when its category is blocked, when its address
    /// names an image file, or when its domain is blacklisted. Checks run in
    /// that order and the first match gives the reason.
    pub fn decide(&self, request: &SubRequest) -> Decision {
        if self.blocked_kinds.contains(&request.kind) {
            return Decision::Block(BlockReason::ResourceKind(request.kind));
        }

        if image_extension_re().is_match(&request.url) {
            return Decision::Block(BlockReason::ImageExtension);
        }

        if let Some(domain) = request_domain(&request.url) {
            if self.blacklist.contains(&domain) {
                return Decision::Block(BlockReason::Blacklisted(domain));
            }
        }

        Decision::Allow
    }

    pub fn blocked_kinds(&self) -> &HashSet<ResourceKind> {
        &self.blocked_kinds
    }
}
