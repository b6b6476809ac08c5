//! Harvest coordinator - main orchestration logic
//!
//! This module runs the phases of a harvest against a session pool:
//! - Discovering the listing pages from the catalog root
//! - Fanning out over listing pages to collect item references
//! - Fanning out over items to scrape, enrich and store their records
//! - Tracking throughput and shutting the pool down

use crate::config::{Config, HarvestConfig};
use crate::filter::{Blacklist, RequestFilter};
use crate::harvest::progress::Progress;
use crate::harvest::{item_id, listing_addresses, DetailRef, PageExtractor, SelectorExtractor};
use crate::retry::retry_async;
use crate::session::{HttpBrowser, PoolConfig, SessionError, SessionPool};
use crate::storage::{open_store, Record, RecordStore, UpdatePolicy, SCRAPE_DATE_KEY};
use crate::{HarvestError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::{join_all, try_join_all};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use url::Url;

/// Outcome of a harvest run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Listing pages discovered on the catalog root
    pub listing_pages: usize,

    /// Listing pages that could not be scraped
    pub failed_listings: usize,

    /// Item references collected from the listing pages
    pub details_found: usize,

    /// Records written to the store
    pub stored: usize,

    /// Items left alone by the update policy
    pub skipped: usize,

    /// Items that could not be scraped or stored
    pub failed: usize,

    /// Whether any listing page or item failed
    pub had_failures: bool,

    /// Most sessions live at once
    pub peak_live_sessions: usize,

    pub elapsed: Duration,
}

/// What happened to one item
enum ItemOutcome {
    Stored,
    Skipped,
}

/// Main harvest coordinator structure
pub struct Harvester {
    config: HarvestConfig,
    catalog_url: Url,
    update: UpdatePolicy,
    pool: Arc<SessionPool>,
    extractor: Arc<dyn PageExtractor>,
    store: Arc<dyn RecordStore>,
}

impl Harvester {
    /// Creates a new harvester
    ///
    /// # Arguments
    ///
    /// * `config` - The harvest configuration
    /// * `pool` - Session pool every page is loaded through
    /// * `extractor` - Reads catalog structure out of loaded pages
    /// * `store` - Destination of the records
    ///
    /// # Returns
    ///
    /// * `Ok(Harvester)` - Ready to run
    /// * `Err(HarvestError)` - The catalog address or update policy is invalid
    pub fn new(
        config: &Config,
        pool: Arc<SessionPool>,
        extractor: Arc<dyn PageExtractor>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        Ok(Self {
            config: config.harvest.clone(),
            catalog_url: config.catalog_url()?,
            update: config.output.update_policy()?,
            pool,
            extractor,
            store,
        })
    }

    /// Runs every phase of the harvest
    ///
    /// Item failures are counted in the report; only fatal errors (discovery,
    /// or the first failure when fail-fast is set) are returned as `Err`. The
    /// pool is shut down in both cases.
    pub async fn run(&self) -> Result<RunReport> {
        let started = Instant::now();
        tracing::info!("Starting harvest of {}", self.catalog_url);

        let outcome = self.run_phases(started).await;
        self.pool.shutdown().await;

        let mut report = outcome?;
        report.peak_live_sessions = self.pool.stats().peak_live;
        report.elapsed = started.elapsed();

        tracing::info!(
            "Harvest completed: {} stored, {} skipped, {} failed in {}",
            report.stored,
            report.skipped,
            report.failed,
            indicatif::HumanDuration(report.elapsed)
        );

        Ok(report)
    }

    async fn run_phases(&self, started: Instant) -> Result<RunReport> {
        tracing::info!("Scraping listings...");
        let listing_pages = self.discover().await?;
        tracing::debug!("{} listing pages found", listing_pages.len());

        let (details, failed_listings) = self.scrape_listings(&listing_pages, started).await?;

        let mut report = RunReport {
            listing_pages: listing_pages.len(),
            failed_listings,
            details_found: details.len(),
            stored: 0,
            skipped: 0,
            failed: 0,
            had_failures: failed_listings > 0,
            peak_live_sessions: 0,
            elapsed: Duration::ZERO,
        };

        if self.config.discovery_only {
            tracing::info!("Discovery only: {} items found, not scraping them", details.len());
            return Ok(report);
        }

        tracing::info!("Scraping {} items...", details.len());
        let progress = self.scrape_details(&details, started).await?;

        report.skipped = progress.skipped();
        report.stored = progress.done() - progress.skipped();
        report.failed = progress.failed();
        report.had_failures |= progress.failed() > 0;

        Ok(report)
    }

    /// Reads the listing page count off the catalog root
    async fn discover(&self) -> Result<Vec<Url>> {
        let extractor = Arc::clone(&self.extractor);
        let settle = Duration::from_millis(self.config.settle_delay_ms);

        let last_page = self
            .pool
            .with_session(&self.catalog_url, move |session| {
                Box::pin(async move {
                    if !settle.is_zero() {
                        tokio::time::sleep(settle).await;
                    }
                    let html = session.content().await?;
                    let page = session.current_url().cloned().ok_or(SessionError::NotNavigated)?;
                    extractor
                        .last_listing_page(&page, &html)
                        .map_err(|e| HarvestError::Discovery(e.to_string()))
                })
            })
            .await?;

        listing_addresses(&last_page)
    }

    /// Collects item references from every listing page, in page order
    ///
    /// Returns the references and the number of listing pages that failed.
    async fn scrape_listings(
        &self,
        pages: &[Url],
        started: Instant,
    ) -> Result<(Vec<DetailRef>, usize)> {
        let progress = Mutex::new(self.progress(pages.len(), started));
        let tasks = pages
            .iter()
            .map(|address| self.scrape_listing(address, &progress));

        if self.config.fail_fast {
            let groups = try_join_all(tasks).await?;
            return Ok((groups.into_iter().flatten().collect(), 0));
        }

        let mut details = Vec::new();
        let mut failed = 0;
        for (address, result) in pages.iter().zip(join_all(tasks).await) {
            match result {
                Ok(group) => details.extend(group),
                Err(e) => {
                    tracing::error!("Failed while scraping listing {}: {}", address, e);
                    failed += 1;
                }
            }
        }
        Ok((details, failed))
    }

    async fn scrape_listing(
        &self,
        address: &Url,
        progress: &Mutex<Progress>,
    ) -> Result<Vec<DetailRef>> {
        let result = retry_async(self.config.scraping_retry, || self.listing_once(address)).await;

        let mut progress = lock(progress);
        match &result {
            Ok(_) => {
                let now = Instant::now();
                progress.record_completion(now);
                tracing::info!("{} scraped ({})", address, progress.summary(now));
            }
            Err(e) => {
                progress.record_failure();
                if self.config.fail_fast {
                    tracing::error!("Failed while scraping listing {}: {}", address, e);
                }
            }
        }
        result
    }

    async fn listing_once(&self, address: &Url) -> Result<Vec<DetailRef>> {
        let extractor = Arc::clone(&self.extractor);
        self.pool
            .with_session(address, move |session| {
                Box::pin(async move {
                    let html = session.content().await?;
                    let page = session.current_url().cloned().ok_or(SessionError::NotNavigated)?;
                    tracing::debug!("Scraping listing at {}", page);
                    extractor
                        .listing_entries(&page, &html)
                        .map_err(|source| HarvestError::Extract {
                            url: page.to_string(),
                            source,
                        })
                })
            })
            .await
    }

    /// Scrapes and stores every item, returning the final counters
    async fn scrape_details(&self, details: &[DetailRef], started: Instant) -> Result<Progress> {
        let progress = Mutex::new(self.progress(details.len(), started));
        let tasks = details.iter().map(|item| self.harvest_item(item, &progress));

        if self.config.fail_fast {
            try_join_all(tasks).await?;
        } else {
            join_all(tasks).await;
        }

        Ok(progress.into_inner().unwrap_or_else(PoisonError::into_inner))
    }

    /// Harvests one item, logging and counting its failure
    async fn harvest_item(&self, item: &DetailRef, progress: &Mutex<Progress>) -> Result<()> {
        match self.try_harvest_item(item).await {
            Ok(ItemOutcome::Stored) => {
                let now = Instant::now();
                let mut progress = lock(progress);
                progress.record_completion(now);
                tracing::info!("{} scraped ({})", item.name, progress.summary(now));
                Ok(())
            }
            Ok(ItemOutcome::Skipped) => {
                tracing::debug!("Not updating {}", item.name);
                lock(progress).record_skip();
                Ok(())
            }
            Err(e) => {
                lock(progress).record_failure();
                tracing::error!("Failed while scraping {} at {}: {}", item.name, item.address, e);
                if self.config.fail_fast {
                    Err(e)
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn try_harvest_item(&self, item: &DetailRef) -> Result<ItemOutcome> {
        let id = item_id(&item.address);

        let existing = self.store.existing(&id)?;
        if self.update.should_skip(existing.as_ref()) {
            return Ok(ItemOutcome::Skipped);
        }

        let fields =
            retry_async(self.config.scraping_retry, || self.detail_once(&item.address)).await?;

        let record = enrich(id, &item.address, fields, Utc::now());
        self.store.store(&record)?;
        Ok(ItemOutcome::Stored)
    }

    async fn detail_once(&self, address: &Url) -> Result<Map<String, Value>> {
        let extractor = Arc::clone(&self.extractor);
        self.pool
            .with_session(address, move |session| {
                Box::pin(async move {
                    let html = session.content().await?;
                    let page = session.current_url().cloned().ok_or(SessionError::NotNavigated)?;
                    extractor
                        .detail_record(&page, &html)
                        .map_err(|source| HarvestError::Extract {
                            url: page.to_string(),
                            source,
                        })
                })
            })
            .await
    }

    fn progress(&self, total: usize, started: Instant) -> Progress {
        Progress::new(
            total,
            Duration::from_secs(self.config.progress_window_secs),
            started,
        )
    }
}

fn lock(progress: &Mutex<Progress>) -> MutexGuard<'_, Progress> {
    progress.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Adds the harvest metadata to extracted fields
fn enrich(
    id: String,
    address: &Url,
    mut fields: Map<String, Value>,
    scraped_at: DateTime<Utc>,
) -> Record {
    fields.insert("address".to_string(), Value::String(address.to_string()));
    fields.insert(
        SCRAPE_DATE_KEY.to_string(),
        Value::String(scraped_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    fields.insert(
        "scrapper".to_string(),
        Value::String(format!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))),
    );

    Record {
        id,
        scraped_at,
        data: fields,
    }
}

/// Builds every collaborator from the configuration and runs a harvest
///
/// # Arguments
///
/// * `config` - Validated configuration
///
/// # Returns
///
/// * `Ok(RunReport)` - The run finished; check `had_failures`
/// * `Err(HarvestError)` - Setup failed or the run was aborted
pub async fn run_harvest(config: &Config) -> Result<RunReport> {
    let blacklist = match &config.session.blacklist_path {
        Some(path) => Blacklist::load(path).await?,
        None => Blacklist::empty(),
    };
    let filter = Arc::new(RequestFilter::new(
        Arc::new(blacklist),
        config.session.blocked_resources.iter().copied().collect(),
    ));

    let browser = Arc::new(HttpBrowser::from_config(&config.session)?);
    let pool = Arc::new(SessionPool::new(
        browser,
        filter,
        PoolConfig {
            limit: config.harvest.concurrency,
            navigation_retry: config.harvest.navigation_retry,
        },
    ));

    let extractor = Arc::new(SelectorExtractor::from_config(&config.extractor)?);
    let store = open_store(&config.output)?;

    Harvester::new(config, pool, extractor, store)?.run().await
}
