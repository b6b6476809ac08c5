//! Bounded session pool
//!
//! The pool lends sessions to callers and caps how many exist at once:
//! - Idle sessions are reused before new ones are opened
//! - At most `limit` sessions are live (idle + lent out) at any time
//! - Callers beyond the limit wait in a FIFO queue; a released session is
//!   handed directly to the longest-waiting caller
//! - Navigation failures discard the session and retry on a fresh one
//! - A cancelled acquisition or task gives its session and slot back
//!
//! Pool state sits behind a `std::sync::Mutex` that is only held for short,
//! synchronous bookkeeping and never across an `.await`.

use crate::filter::RequestFilter;
use crate::retry::retry_async;
use crate::session::{Browser, Session, SessionError};
use crate::HarvestError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use url::Url;

/// Pool-assigned identifier of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A session lent out by the pool
///
/// Owned by exactly one holder at a time: the pool while idle, the caller
/// between `acquire` and `release`.
pub struct PooledSession {
    id: HandleId,
    session: Box<dyn Session>,
}

impl PooledSession {
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Loads `url` in this session
    pub async fn goto(&mut self, url: &Url) -> Result<(), SessionError> {
        self.session.goto(url).await
    }

    /// HTML of the current page
    pub async fn content(&self) -> Result<String, SessionError> {
        self.session.content().await
    }

    pub fn current_url(&self) -> Option<&Url> {
        self.session.current_url()
    }
}

impl fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledSession")
            .field("id", &self.id)
            .field("current_url", &self.current_url().map(Url::as_str))
            .finish()
    }
}

/// Pool sizing and navigation policy
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Maximum number of live sessions
    pub limit: usize,

    /// Extra navigation attempts, each on a freshly opened session
    pub navigation_retry: u32,
}

/// Snapshot of the pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub limit: usize,
    pub live: usize,
    pub available: usize,
    pub in_use: usize,
    pub waiting: usize,
    pub peak_live: usize,
    pub created: u64,
    pub closed: u64,
}

/// What a waiting caller receives
enum Grant {
    /// A released session, handed over without passing through `available`
    Handle(PooledSession),
    /// A freed slot: the waiter opens its own session in it
    Slot,
}

#[derive(Default)]
struct PoolState {
    available: VecDeque<PooledSession>,
    waiters: VecDeque<oneshot::Sender<Grant>>,
    live: usize,
    peak_live: usize,
    created: u64,
    closed: u64,
    shut_down: bool,
}

impl PoolState {
    /// Gives `handle` to the longest-waiting caller still listening
    ///
    /// Returns the handle back when nobody is waiting.
    fn hand_off(&mut self, mut handle: PooledSession) -> Option<PooledSession> {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(Grant::Handle(handle)) {
                Ok(()) => return None,
                Err(Grant::Handle(returned)) => handle = returned,
                Err(Grant::Slot) => unreachable!("only a handle was sent"),
            }
        }
        Some(handle)
    }

    /// Passes a reserved slot to the next waiter, or gives it up
    fn free_slot(&mut self, limit: usize) {
        if !self.shut_down && self.live <= limit {
            while let Some(waiter) = self.waiters.pop_front() {
                if waiter.send(Grant::Slot).is_ok() {
                    return;
                }
            }
        }
        self.live = self.live.saturating_sub(1);
    }

    /// Decides what happens to a session coming back to the pool
    ///
    /// Returns the session when it must be closed.
    fn settle(&mut self, handle: PooledSession, limit: usize) -> Option<PooledSession> {
        if self.shut_down || self.live > limit {
            self.live -= 1;
            return Some(handle);
        }
        if let Some(handle) = self.hand_off(handle) {
            self.available.push_back(handle);
        }
        None
    }
}

/// Bounded lender of page sessions
pub struct SessionPool {
    browser: Arc<dyn Browser>,
    filter: Arc<RequestFilter>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
}

impl SessionPool {
    /// Creates an empty pool; sessions are opened lazily
    pub fn new(browser: Arc<dyn Browser>, filter: Arc<RequestFilter>, config: PoolConfig) -> Self {
        Self {
            browser,
            filter,
            config: PoolConfig {
                limit: config.limit.max(1),
                ..config
            },
            state: Mutex::new(PoolState::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes a session from the pool, optionally navigated to `target`
    ///
    /// Suspends when `limit` sessions are already lent out. When navigation
    /// still fails after the retry budget, the error is returned and no
    /// session is left behind: the failed session is closed and its slot
    /// passed on. Dropping the returned future at any point gives back
    /// whatever it holds.
    pub async fn acquire(&self, target: Option<&Url>) -> Result<PooledSession, HarvestError> {
        let mut lease = self.checkout().await?;
        if let Some(url) = target {
            self.navigate(&mut lease, url).await?;
        }
        Ok(lease.keep()?)
    }

    /// Returns a session to the pool
    ///
    /// The session goes to the longest waiter if there is one, otherwise it
    /// becomes idle. A session that would put the pool above its limit is
    /// closed instead.
    pub async fn release(&self, handle: PooledSession) {
        let excess = {
            let mut state = self.lock();
            state.settle(handle, self.config.limit)
        };

        if let Some(handle) = excess {
            tracing::debug!("Extra session {} closed", handle.id);
            self.close_session(handle).await;
        }
    }

    /// Registers a session opened outside the pool
    ///
    /// The session counts as live and is then released; sessions beyond the
    /// limit are closed right away.
    pub async fn adopt(&self, session: Box<dyn Session>) {
        let handle = PooledSession {
            id: self.next_handle_id(),
            session,
        };

        let excess = {
            let mut state = self.lock();
            state.live += 1;
            let excess = state.settle(handle, self.config.limit);
            state.peak_live = state.peak_live.max(state.live);
            excess
        };

        if let Some(handle) = excess {
            tracing::debug!("Adopted session {} exceeds the limit, closing it", handle.id);
            self.close_session(handle).await;
        }
    }

    /// Runs `task` on a session navigated to `address`
    ///
    /// The session is released whatever the task outcome, panics included
    /// (the panic resumes after the release).
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use catalog_harvest::session::SessionPool;
    /// # async fn example(pool: &SessionPool, url: &url::Url) -> catalog_harvest::Result<()> {
    /// let html = pool
    ///     .with_session(url, |session| {
    ///         Box::pin(async move { Ok(session.content().await?) })
    ///     })
    ///     .await?;
    /// # let _ = html;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_session<T, F>(&self, address: &Url, task: F) -> Result<T, HarvestError>
    where
        F: for<'a> FnOnce(&'a mut PooledSession) -> BoxFuture<'a, Result<T, HarvestError>>,
    {
        let mut lease = self.checkout().await?;
        self.navigate(&mut lease, address).await?;

        // Cancelling this future mid-task drops the lease, which closes the
        // session and frees its slot.
        let outcome = AssertUnwindSafe(task(lease.session()?))
            .catch_unwind()
            .await;
        self.release(lease.keep()?).await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Closes every idle session and refuses further acquisitions
    ///
    /// Pending waiters are woken with [`HarvestError::PoolClosed`]; sessions
    /// still lent out are closed when they are released.
    pub async fn shutdown(&self) {
        let idle: Vec<PooledSession> = {
            let mut state = self.lock();
            state.shut_down = true;
            state.waiters.clear();
            let idle: Vec<PooledSession> = state.available.drain(..).collect();
            state.live -= idle.len();
            idle
        };

        tracing::debug!("Shutting down session pool, closing {} idle sessions", idle.len());
        for handle in idle {
            self.close_session(handle).await;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            limit: self.config.limit,
            live: state.live,
            available: state.available.len(),
            in_use: state.live - state.available.len(),
            waiting: state.waiters.iter().filter(|w| !w.is_closed()).count(),
            peak_live: state.peak_live,
            created: state.created,
            closed: state.closed,
        }
    }

    /// Obtains an unnavigated session, waiting for one if needed
    async fn checkout(&self) -> Result<Lease<'_>, HarvestError> {
        let rx = {
            let mut state = self.lock();
            if state.shut_down {
                return Err(HarvestError::PoolClosed);
            }
            if let Some(handle) = state.available.pop_front() {
                return Ok(Lease::reserved(self).holding(handle));
            }
            if state.live < self.config.limit {
                state.live += 1;
                state.peak_live = state.peak_live.max(state.live);
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            }
        };

        let mut lease = match rx {
            None => Lease::reserved(self),
            Some(rx) => {
                let mut waiter = Waiter { pool: self, rx };
                match (&mut waiter.rx).await {
                    Ok(Grant::Handle(handle)) => return Ok(Lease::reserved(self).holding(handle)),
                    Ok(Grant::Slot) => Lease::reserved(self),
                    Err(_) => return Err(HarvestError::PoolClosed),
                }
            }
        };

        lease.put(self.open_session().await?);
        Ok(lease)
    }

    /// Puts back a grant whose receiver went away before reading it
    fn reclaim(&self, grant: Grant) {
        match grant {
            Grant::Handle(handle) => {
                let excess = self.lock().settle(handle, self.config.limit);
                if let Some(handle) = excess {
                    self.close_detached(handle);
                }
            }
            Grant::Slot => self.lock().free_slot(self.config.limit),
        }
    }

    async fn open_session(&self) -> Result<PooledSession, SessionError> {
        let session = self.browser.new_session(Arc::clone(&self.filter)).await?;
        let handle = PooledSession {
            id: self.next_handle_id(),
            session,
        };
        self.lock().created += 1;
        tracing::debug!("New session {} opened", handle.id);
        Ok(handle)
    }

    async fn close_session(&self, handle: PooledSession) {
        let id = handle.id;
        if let Err(e) = handle.session.close().await {
            tracing::warn!("Failed to close session {}: {}", id, e);
        }
        self.lock().closed += 1;
    }

    /// Closes a session from a synchronous context
    ///
    /// The close is polled once in place; if it does not finish, the rest
    /// runs on the current runtime.
    fn close_detached(&self, handle: PooledSession) {
        let id = handle.id;
        self.lock().closed += 1;

        let mut closing = handle.session.close();
        match (&mut closing).now_or_never() {
            Some(Ok(())) => {}
            Some(Err(e)) => tracing::warn!("Failed to close session {}: {}", id, e),
            None => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move {
                        if let Err(e) = closing.await {
                            tracing::warn!("Failed to close session {}: {}", id, e);
                        }
                    });
                }
                Err(_) => tracing::warn!("Session {} dropped without a runtime to close it", id),
            },
        }
    }

    fn next_handle_id(&self) -> HandleId {
        HandleId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Navigates a freshly checked-out session, retrying on new sessions
    ///
    /// On failure the lease is left empty; dropping it frees the slot.
    async fn navigate(&self, lease: &mut Lease<'_>, url: &Url) -> Result<(), HarvestError> {
        let first_error = match lease.session()?.goto(url).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        // A session that failed to navigate is not reused; its slot is kept
        // for the retries.
        lease.discard().await;

        let result = if self.config.navigation_retry == 0 {
            Err(first_error)
        } else {
            tracing::debug!("Page loading failed, retrying ({}): {}", url, first_error);
            retry_async(self.config.navigation_retry - 1, || self.navigate_fresh(url)).await
        };

        match result {
            Ok(handle) => {
                lease.put(handle);
                Ok(())
            }
            Err(source) => Err(HarvestError::Navigation {
                url: url.to_string(),
                source,
            }),
        }
    }

    /// One navigation attempt on a brand-new session
    async fn navigate_fresh(&self, url: &Url) -> Result<PooledSession, SessionError> {
        let mut attempt = Lease::unreserved(self).holding(self.open_session().await?);
        match attempt.session()?.goto(url).await {
            Ok(()) => attempt.keep(),
            Err(e) => {
                attempt.discard().await;
                Err(e)
            }
        }
    }
}

/// A session (and usually its live slot) held by an acquisition in flight
///
/// Dropping a lease that was not kept closes its session and, when it owns
/// a slot, gives the slot back.
struct Lease<'a> {
    pool: &'a SessionPool,
    handle: Option<PooledSession>,
    owns_slot: bool,
}

impl<'a> Lease<'a> {
    /// A slot already counted as live, with no session yet
    fn reserved(pool: &'a SessionPool) -> Self {
        Self {
            pool,
            handle: None,
            owns_slot: true,
        }
    }

    /// A session whose slot is accounted for elsewhere
    fn unreserved(pool: &'a SessionPool) -> Self {
        Self {
            pool,
            handle: None,
            owns_slot: false,
        }
    }

    fn holding(mut self, handle: PooledSession) -> Self {
        self.handle = Some(handle);
        self
    }

    fn put(&mut self, handle: PooledSession) {
        self.handle = Some(handle);
    }

    fn session(&mut self) -> Result<&mut PooledSession, SessionError> {
        self.handle.as_mut().ok_or(SessionError::Closed)
    }

    /// Closes the current session, keeping the slot
    async fn discard(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.close_session(handle).await;
        }
    }

    /// Hands the session, and its slot, over to the caller
    fn keep(mut self) -> Result<PooledSession, SessionError> {
        let handle = self.handle.take().ok_or(SessionError::Closed)?;
        self.owns_slot = false;
        Ok(handle)
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!("Session {} abandoned in flight, closing it", handle.id);
            self.pool.close_detached(handle);
        }
        if self.owns_slot {
            self.pool.lock().free_slot(self.pool.config.limit);
        }
    }
}

/// A caller queued for a session
///
/// A grant sent just before the caller went away would otherwise be lost
/// with the channel; dropping the waiter puts it back.
struct Waiter<'a> {
    pool: &'a SessionPool,
    rx: oneshot::Receiver<Grant>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.rx.close();
        if let Ok(grant) = self.rx.try_recv() {
            self.pool.reclaim(grant);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::ScriptedBrowser;
    use std::time::Duration;

    fn pool_with(
        browser: &Arc<ScriptedBrowser>,
        limit: usize,
        navigation_retry: u32,
    ) -> Arc<SessionPool> {
        Arc::new(SessionPool::new(
            Arc::clone(browser) as Arc<dyn Browser>,
            Arc::new(RequestFilter::allow_all()),
            PoolConfig {
                limit,
                navigation_retry,
            },
        ))
    }

    fn url(path: &str) -> Url {
        Url::parse(&format!("https://catalog.test{}", path)).unwrap()
    }

    async fn wait_for_waiters(pool: &SessionPool, count: usize) {
        for _ in 0..1000 {
            if pool.stats().waiting == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("expected {} waiters, got {}", count, pool.stats().waiting);
    }

    #[tokio::test]
    async fn test_idle_session_is_reused() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, 2, 0);

        let first = pool.acquire(None).await.unwrap();
        let first_id = first.id();
        pool.release(first).await;

        let second = pool.acquire(None).await.unwrap();
        assert_eq!(second.id(), first_id);
        assert_eq!(pool.stats().created, 1);
        assert_eq!(browser.opened(), 1);
    }

    #[tokio::test]
    async fn test_acquire_navigates_to_target() {
        let browser = ScriptedBrowser::new();
        browser.add_page("https://catalog.test/phones", "<html></html>");
        let pool = pool_with(&browser, 1, 0);

        let handle = pool.acquire(Some(&url("/phones"))).await.unwrap();
        assert_eq!(handle.current_url(), Some(&url("/phones")));
        assert_eq!(handle.content().await.unwrap(), "<html></html>");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_burst_never_exceeds_limit() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, 3, 0);

        let tasks: Vec<_> = (0..40)
            .map(|i| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    let handle = pool.acquire(None).await.unwrap();
                    let stats = pool.stats();
                    assert!(stats.available + stats.in_use <= stats.limit);
                    assert!(stats.live <= stats.limit);
                    tokio::time::sleep(Duration::from_millis((i % 5) as u64)).await;
                    pool.release(handle).await;
                    let stats = pool.stats();
                    assert!(stats.available + stats.in_use <= stats.limit);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        let stats = pool.stats();
        assert!(stats.peak_live <= 3);
        assert!(browser.peak_open() <= 3);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.available, stats.live);
    }

    #[tokio::test]
    async fn test_release_hands_off_to_longest_waiter() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, 1, 0);

        let held = pool.acquire(None).await.unwrap();
        let held_id = held.id();

        let first_waiter = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire(None).await.unwrap() }
        });
        wait_for_waiters(&pool, 1).await;

        let second_waiter = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire(None).await.unwrap() }
        });
        wait_for_waiters(&pool, 2).await;

        pool.release(held).await;
        // Handed over directly, never parked as idle
        assert_eq!(pool.stats().available, 0);

        let first = first_waiter.await.unwrap();
        assert_eq!(first.id(), held_id);
        assert!(!second_waiter.is_finished());

        pool.release(first).await;
        let second = second_waiter.await.unwrap();
        assert_eq!(second.id(), held_id);
        assert_eq!(pool.stats().created, 1);
    }

    #[tokio::test]
    async fn test_navigation_retries_on_fresh_sessions() {
        let browser = ScriptedBrowser::new();
        browser.add_page("https://catalog.test/item", "<p>item</p>");
        browser.fail_navigation("https://catalog.test/item", 2);
        let pool = pool_with(&browser, 2, 2);

        let handle = pool.acquire(Some(&url("/item"))).await.unwrap();
        assert_eq!(handle.current_url(), Some(&url("/item")));
        assert_eq!(browser.navigations_to("https://catalog.test/item"), 3);

        // Both failed sessions were discarded, only the good one is live
        assert_eq!(browser.opened(), 3);
        assert_eq!(browser.closed(), 2);
        assert_eq!(pool.stats().live, 1);
    }

    #[tokio::test]
    async fn test_navigation_exhaustion_propagates_and_frees_slot() {
        let browser = ScriptedBrowser::new();
        browser.add_page("https://catalog.test/item", "<p>item</p>");
        browser.fail_navigation("https://catalog.test/item", 10);
        let pool = pool_with(&browser, 1, 1);

        let result = pool.acquire(Some(&url("/item"))).await;
        assert!(matches!(result, Err(HarvestError::Navigation { .. })));
        assert_eq!(browser.navigations_to("https://catalog.test/item"), 2);
        assert_eq!(browser.open_now(), 0);
        assert_eq!(pool.stats().live, 0);

        // The slot is usable again
        let handle = pool.acquire(None).await.unwrap();
        pool.release(handle).await;
    }

    #[tokio::test]
    async fn test_navigation_failure_passes_slot_to_waiter() {
        let browser = ScriptedBrowser::new();
        browser.add_page("https://catalog.test/broken", "");
        browser.fail_navigation("https://catalog.test/broken", 10);
        let pool = pool_with(&browser, 1, 0);

        let held = pool.acquire(None).await.unwrap();

        let failing = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire(Some(&url("/broken"))).await }
        });
        wait_for_waiters(&pool, 1).await;

        let patient = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire(None).await }
        });
        wait_for_waiters(&pool, 2).await;

        pool.release(held).await;

        assert!(failing.await.unwrap().is_err());
        let handle = patient.await.unwrap().unwrap();
        assert_eq!(pool.stats().live, 1);
        assert_eq!(pool.stats().in_use, 1);
        pool.release(handle).await;
    }

    #[tokio::test]
    async fn test_open_failure_frees_slot() {
        let browser = ScriptedBrowser::new();
        browser.fail_next_opens(1);
        let pool = pool_with(&browser, 1, 0);

        let result = pool.acquire(None).await;
        assert!(matches!(result, Err(HarvestError::Session(_))));
        assert_eq!(pool.stats().live, 0);

        let handle = pool.acquire(None).await.unwrap();
        assert_eq!(pool.stats().live, 1);
        pool.release(handle).await;
    }

    #[tokio::test]
    async fn test_adopted_sessions_beyond_limit_are_closed() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, 1, 0);

        pool.adopt(browser.detached_session()).await;
        assert_eq!(pool.stats().available, 1);

        pool.adopt(browser.detached_session()).await;
        let stats = pool.stats();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.available, 1);
        assert_eq!(browser.closed(), 1);
    }

    #[tokio::test]
    async fn test_with_session_releases_on_error() {
        let browser = ScriptedBrowser::new();
        browser.add_page("https://catalog.test/item", "<p>item</p>");
        let pool = pool_with(&browser, 1, 0);

        let result: Result<(), HarvestError> = pool
            .with_session(&url("/item"), |_session| {
                Box::pin(async { Err(HarvestError::Discovery("boom".to_string())) })
            })
            .await;

        assert!(result.is_err());
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.available, 1);
    }

    async fn explode() -> Result<(), HarvestError> {
        panic!("extractor bug")
    }

    #[tokio::test]
    async fn test_with_session_releases_on_panic() {
        let browser = ScriptedBrowser::new();
        browser.add_page("https://catalog.test/item", "<p>item</p>");
        let pool = pool_with(&browser, 1, 0);

        let task = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move {
                pool.with_session(&url("/item"), |_session| Box::pin(explode())).await
            }
        });

        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(pool.stats().available, 1);
        assert_eq!(pool.stats().in_use, 0);
    }

    async fn stall() -> Result<(), HarvestError> {
        futures::future::pending().await
    }

    #[tokio::test]
    async fn test_handle_granted_to_cancelled_waiter_is_kept() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, 1, 0);

        let held = pool.acquire(None).await.unwrap();
        let mut waiter = Box::pin(pool.acquire(None));
        assert!(futures::poll!(&mut waiter).is_pending());
        assert_eq!(pool.stats().waiting, 1);

        // Handed to the waiter, which goes away before reading it
        pool.release(held).await;
        drop(waiter);

        let stats = pool.stats();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.available, 1);

        let handle = tokio::time::timeout(Duration::from_millis(200), pool.acquire(None))
            .await
            .expect("pool should not be wedged")
            .unwrap();
        assert_eq!(browser.opened(), 1);
        pool.release(handle).await;
    }

    #[tokio::test]
    async fn test_slot_granted_to_cancelled_waiter_is_freed() {
        let browser = ScriptedBrowser::new();
        browser.add_page("https://catalog.test/broken", "");
        browser.fail_navigation("https://catalog.test/broken", 10);
        let pool = pool_with(&browser, 1, 0);

        let broken = url("/broken");
        let mut failing = Box::pin(pool.acquire(Some(&broken)));
        assert!(futures::poll!(&mut failing).is_pending());

        let mut waiter = Box::pin(pool.acquire(None));
        assert!(futures::poll!(&mut waiter).is_pending());

        // The failed navigation passes its slot to the waiter
        assert!(failing.await.is_err());
        drop(waiter);

        assert_eq!(pool.stats().live, 0);
        assert_eq!(browser.open_now(), 0);
        let handle = tokio::time::timeout(Duration::from_millis(200), pool.acquire(None))
            .await
            .expect("pool should not be wedged")
            .unwrap();
        pool.release(handle).await;
    }

    #[tokio::test]
    async fn test_cancelled_navigation_closes_session() {
        let browser = ScriptedBrowser::new();
        browser.add_page("https://catalog.test/item", "<p>item</p>");
        let pool = pool_with(&browser, 1, 0);

        let item = url("/item");
        let mut acquiring = Box::pin(pool.acquire(Some(&item)));
        assert!(futures::poll!(&mut acquiring).is_pending());
        assert_eq!(browser.open_now(), 1);
        drop(acquiring);

        assert_eq!(pool.stats().live, 0);
        assert_eq!(browser.open_now(), 0);
        assert_eq!(browser.closed(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_task_releases_slot() {
        let browser = ScriptedBrowser::new();
        browser.add_page("https://catalog.test/item", "<p>item</p>");
        let pool = pool_with(&browser, 1, 0);

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            pool.with_session(&url("/item"), |_session| Box::pin(stall())),
        )
        .await;

        assert!(result.is_err());
        let stats = pool.stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.in_use, 0);
        assert_eq!(browser.open_now(), 0);

        let handle = pool.acquire(Some(&url("/item"))).await.unwrap();
        pool.release(handle).await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_and_rejects_waiters() {
        let browser = ScriptedBrowser::new();
        let pool = pool_with(&browser, 2, 0);

        let a = pool.acquire(None).await.unwrap();
        let b = pool.acquire(None).await.unwrap();
        pool.release(a).await;

        let blocked = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move {
                let first = pool.acquire(None).await.unwrap();
                let second = pool.acquire(None).await;
                pool.release(first).await;
                second
            }
        });
        wait_for_waiters(&pool, 1).await;

        pool.shutdown().await;
        assert!(matches!(blocked.await.unwrap(), Err(HarvestError::PoolClosed)));

        // Sessions still lent out are closed on release
        pool.release(b).await;
        assert!(matches!(pool.acquire(None).await, Err(HarvestError::PoolClosed)));
        assert_eq!(pool.stats().live, 0);
        assert_eq!(browser.open_now(), 0);
    }
}
