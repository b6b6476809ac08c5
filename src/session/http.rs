//! HTTP session backend
//!
//! This backend loads documents with `reqwest`. It does not execute scripts,
//! so the sub-resources a loaded document references (images, scripts,
//! stylesheets, fonts, media, frames) are discovered from its markup and run
//! through the session's request filter. Nothing blocked is ever fetched; the
//! decisions are counted per session.

use crate::config::SessionConfig;
use crate::filter::{Decision, RequestFilter, ResourceKind, SubRequest};
use crate::session::{Browser, Session, SessionError};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Builds the HTTP client shared by all sessions
///
/// # Arguments
///
/// * `config` - Session configuration (user agent, navigation timeout)
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &SessionConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.navigation_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Opens [`HttpSession`]s over one shared client
#[derive(Debug, Clone)]
pub struct HttpBrowser {
    client: Client,
}

impl HttpBrowser {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, SessionError> {
        Ok(Self::new(build_http_client(config)?))
    }
}

#[async_trait]
impl Browser for HttpBrowser {
    async fn new_session(
        &self,
        filter: Arc<RequestFilter>,
    ) -> Result<Box<dyn Session>, SessionError> {
        Ok(Box::new(HttpSession::new(self.client.clone(), filter)))
    }
}

#[derive(Debug)]
struct LoadedPage {
    url: Url,
    html: String,
}

/// A document-loading session
#[derive(Debug)]
pub struct HttpSession {
    client: Client,
    filter: Arc<RequestFilter>,
    page: Option<LoadedPage>,
    allowed_requests: usize,
    blocked_requests: usize,
}

impl HttpSession {
    pub fn new(client: Client, filter: Arc<RequestFilter>) -> Self {
        Self {
            client,
            filter,
            page: None,
            allowed_requests: 0,
            blocked_requests: 0,
        }
    }

    /// Sub-resource requests let through since the session was opened
    pub fn allowed_requests(&self) -> usize {
        self.allowed_requests
    }

    /// Sub-resource requests blocked since the session was opened
    pub fn blocked_requests(&self) -> usize {
        self.blocked_requests
    }

    fn apply_filter(&mut self, requests: &[SubRequest]) {
        for request in requests {
            match self.filter.decide(request) {
                Decision::Allow => self.allowed_requests += 1,
                Decision::Block(reason) => {
                    tracing::trace!(
                        "Blocked {} request {}: {:?}",
                        request.kind,
                        request.url,
                        reason
                    );
                    self.blocked_requests += 1;
                }
            }
        }
    }
}

#[async_trait]
impl Session for HttpSession {
    async fn goto(&mut self, url: &Url) -> Result<(), SessionError> {
        let response = self.client.get(url.as_str()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        let html = response.text().await?;

        let requests = discover_subresources(&html, &final_url);
        self.apply_filter(&requests);

        self.page = Some(LoadedPage {
            url: final_url,
            html,
        });
        Ok(())
    }

    async fn content(&self) -> Result<String, SessionError> {
        self.page
            .as_ref()
            .map(|page| page.html.clone())
            .ok_or(SessionError::NotNavigated)
    }

    fn current_url(&self) -> Option<&Url> {
        self.page.as_ref().map(|page| &page.url)
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        tracing::trace!(
            "Closing HTTP session ({} sub-requests allowed, {} blocked)",
            self.allowed_requests,
            self.blocked_requests
        );
        Ok(())
    }
}

/// Lists the sub-resources a document would load
///
/// Relative addresses are resolved against `base_url`; `data:` URIs and
/// unresolvable addresses are skipped.
pub fn discover_subresources(html: &str, base_url: &Url) -> Vec<SubRequest> {
    const SOURCES: &[(&str, &str, ResourceKind)] = &[
        ("img[src]", "src", ResourceKind::Image),
        ("link[rel~='icon'][href]", "href", ResourceKind::Image),
        ("script[src]", "src", ResourceKind::Script),
        ("link[rel~='stylesheet'][href]", "href", ResourceKind::Stylesheet),
        ("link[rel~='preload'][as='font'][href]", "href", ResourceKind::Font),
        ("video[src], audio[src], source[src]", "src", ResourceKind::Media),
        ("iframe[src]", "src", ResourceKind::Document),
    ];

    let document = Html::parse_document(html);
    let mut requests = Vec::new();

    for (selector, attr, kind) in SOURCES {
        let Ok(selector) = Selector::parse(selector) else {
            continue;
        };
        for element in document.select(&selector) {
            let Some(value) = element.value().attr(attr) else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() || value.starts_with("data:") {
                continue;
            }
            if let Ok(resolved) = base_url.join(value) {
                requests.push(SubRequest::new(resolved.to_string(), *kind));
            }
        }
    }

    requests
}
