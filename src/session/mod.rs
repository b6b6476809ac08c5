//! Page sessions and the bounded session pool
//!
//! A session is one stateful, expensive page context (a browser tab in a
//! browser backend, a document loader in the HTTP backend). Sessions are
//! opened by a [`Browser`], always with a [`RequestFilter`] installed, and
//! lent out by the [`SessionPool`].

mod http;
mod pool;
#[cfg(test)]
pub(crate) mod testing;

pub use http::{build_http_client, HttpBrowser, HttpSession};
pub use pool::{HandleId, PoolConfig, PoolStats, PooledSession, SessionPool};

use crate::filter::RequestFilter;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use url::Url;

/// Errors raised by a session backend
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to open session: {0}")]
    Open(String),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("No page loaded in session")]
    NotNavigated,

    #[error("Session closed")]
    Closed,

    #[error("{0}")]
    Backend(String),
}

/// One page context
#[async_trait]
pub trait Session: Send + Sync {
    /// Loads `url`, replacing the current page
    async fn goto(&mut self, url: &Url) -> Result<(), SessionError>;

    /// Returns the HTML of the current page
    async fn content(&self) -> Result<String, SessionError>;

    /// Address of the current page, if any
    fn current_url(&self) -> Option<&Url>;

    /// Releases the backend resources of this session
    async fn close(self: Box<Self>) -> Result<(), SessionError>;
}

/// Factory for sessions
#[async_trait]
pub trait Browser: Send + Sync {
    /// Opens a new session with `filter` applied to all of its sub-resource requests
    async fn new_session(
        &self,
        filter: Arc<RequestFilter>,
    ) -> Result<Box<dyn Session>, SessionError>;
}
