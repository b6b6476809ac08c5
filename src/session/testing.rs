//! In-memory browser for unit tests
//!
//! Serves pages from a map, can fail navigations or session opening on
//! demand, and counts everything the pool does with its sessions.

use crate::filter::RequestFilter;
use crate::session::{Browser, Session, SessionError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

#[derive(Default)]
pub(crate) struct ScriptedBrowser {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    pages: Mutex<HashMap<String, String>>,
    navigation_failures: Mutex<HashMap<String, u32>>,
    navigations: Mutex<Vec<String>>,
    open_failures: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    open_now: AtomicUsize,
    peak_open: AtomicUsize,
}

impl ScriptedBrowser {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn add_page(&self, url: &str, html: &str) {
        self.shared
            .pages
            .lock()
            .unwrap()
            .insert(url.to_string(), html.to_string());
    }

    /// Makes the next `times` navigations to `url` fail
    pub(crate) fn fail_navigation(&self, url: &str, times: u32) {
        self.shared
            .navigation_failures
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
    }

    pub(crate) fn fail_next_opens(&self, times: usize) {
        self.shared.open_failures.store(times, Ordering::SeqCst);
    }

    pub(crate) fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn open_now(&self) -> usize {
        self.shared.open_now.load(Ordering::SeqCst)
    }

    pub(crate) fn peak_open(&self) -> usize {
        self.shared.peak_open.load(Ordering::SeqCst)
    }

    pub(crate) fn navigations_to(&self, url: &str) -> usize {
        self.shared
            .navigations
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }

    /// A session opened outside any pool
    pub(crate) fn detached_session(&self) -> Box<dyn Session> {
        self.track_open();
        Box::new(ScriptedSession {
            shared: Arc::clone(&self.shared),
            current: None,
        })
    }

    fn track_open(&self) {
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        let now = self.shared.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak_open.fetch_max(now, Ordering::SeqCst);
    }
}

#[async_trait]
impl Browser for ScriptedBrowser {
    async fn new_session(
        &self,
        _filter: Arc<RequestFilter>,
    ) -> Result<Box<dyn Session>, SessionError> {
        let should_fail = self
            .shared
            .open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(SessionError::Open("scripted open failure".to_string()));
        }
        Ok(self.detached_session())
    }
}

struct ScriptedSession {
    shared: Arc<Shared>,
    current: Option<Url>,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn goto(&mut self, url: &Url) -> Result<(), SessionError> {
        tokio::task::yield_now().await;

        self.shared
            .navigations
            .lock()
            .unwrap()
            .push(url.to_string());

        {
            let mut failures = self.shared.navigation_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(url.as_str()) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(SessionError::Backend("scripted navigation failure".to_string()));
                }
            }
        }

        if self.shared.pages.lock().unwrap().contains_key(url.as_str()) {
            self.current = Some(url.clone());
            Ok(())
        } else {
            Err(SessionError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    async fn content(&self) -> Result<String, SessionError> {
        let url = self.current.as_ref().ok_or(SessionError::NotNavigated)?;
        self.shared
            .pages
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .ok_or(SessionError::NotNavigated)
    }

    fn current_url(&self) -> Option<&Url> {
        self.current.as_ref()
    }

    async fn close(self: Box<Self>) -> Result<(), SessionError> {
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
        self.shared.open_now.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}
