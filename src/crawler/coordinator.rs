//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the worker pool that drains the frontier, including:
//! - Starting a fresh run or resuming the latest checkpoint
//! - Robots checks, rate limiting and fetching
//! - Extraction, reveal handling and AI-assisted re-extraction
//! - Persisting records and following discovered links
//! - Periodic checkpoints and clean cancellation

use crate::ai::{FieldProposer, ProposerStats};
use crate::config::{Config, FetchMode};
use crate::crawler::fetcher::{classify_status, FetchError, FetchedPage, PageFetcher};
use crate::crawler::frontier::{Frontier, RetryPolicy};
use crate::crawler::rate_limiter::RateLimiter;
use crate::extract::{
    DiscoveredLink, Extraction, ExtractionOptions, LinkKind, SelectorEngine, SelectorStore,
};
use crate::robots::{RobotsCache, ROBOTS_AGENT};
use crate::state::{FrontierItem, FrontierStatus};
use crate::storage::{RunStatus, SqliteStorage, Storage, SubmitOutcome};
use crate::url::{extract_domain, normalize_url, LinkScope};
use crate::ParsonicError;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// Page type given to links found by `detail` link selectors
pub const DETAIL_PAGE_TYPE: &str = "detail";

/// How a run picks up earlier state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Clear the stored frontier and start a new run
    Fresh,
    /// Continue the latest running or interrupted run, or start a new one
    #[default]
    Resume,
}

/// Cooperative cancellation shared by the coordinator and its callers
///
/// Checked between items; in-flight items always finish.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// What a run did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub run_id: i64,
    /// Items taken from the frontier, including retries
    pub processed: u64,
    pub succeeded: u64,
    /// Items that ended FailedPermanent
    pub failed: u64,
    /// Failed attempts that were scheduled for another try
    pub retried: u64,
    pub inserted: u64,
    pub updated: u64,
    /// Pages whose record had no core field
    pub rejected: u64,
    pub ai: ProposerStats,
    pub cancelled: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct RunCounters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    inserted: AtomicU64,
    updated: AtomicU64,
    rejected: AtomicU64,
}

impl RunCounters {
    fn bump(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// State shared by every worker
struct CrawlContext {
    storage: Arc<Mutex<SqliteStorage>>,
    frontier: Frontier,
    fetcher: Arc<dyn PageFetcher>,
    limiter: RateLimiter,
    robots: Option<RobotsCache>,
    engine: SelectorEngine,
    selectors: Arc<SelectorStore>,
    proposer: Option<Arc<FieldProposer>>,
    scope: LinkScope,
    retry: RetryPolicy,
    fetch_mode: FetchMode,
    min_fields: usize,
    checkpoint_interval: u64,
    cancel: CancelSignal,
    counters: RunCounters,
    started: Instant,
}

/// Main crawler coordinator structure
pub struct Coordinator {
    ctx: CrawlContext,
    seeds: Vec<String>,
    seed_page_type: String,
    concurrency: usize,
    config_hash: String,
}

impl Coordinator {
    /// Creates a coordinator for `config`
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `storage` - Result store and checkpoint backend
    /// * `fetcher` - Page fetcher used for pages and robots.txt
    /// * `selectors` - Shared selector store, also handed to the AI proposer
    pub fn new(
        config: &Config,
        storage: SqliteStorage,
        fetcher: Arc<dyn PageFetcher>,
        selectors: Arc<SelectorStore>,
    ) -> Self {
        let crawler = &config.crawler;
        let ctx = CrawlContext {
            storage: Arc::new(Mutex::new(storage)),
            frontier: Frontier::new(crawler.max_depth),
            fetcher,
            limiter: RateLimiter::new(config.rate_limit.clone()),
            robots: crawler
                .respect_robots_txt
                .then(|| RobotsCache::new(ROBOTS_AGENT)),
            engine: SelectorEngine::new(ExtractionOptions::from(&config.extraction)),
            selectors,
            proposer: None,
            scope: LinkScope::new(crawler.same_domain_only, crawler.allowed_domains.clone()),
            retry: RetryPolicy::from(crawler),
            fetch_mode: config.fetcher.mode,
            min_fields: crawler.min_fields,
            checkpoint_interval: u64::from(crawler.checkpoint_interval.max(1)),
            cancel: CancelSignal::new(),
            counters: RunCounters::default(),
            started: Instant::now(),
        };

        Self {
            ctx,
            seeds: config.seeds.clone(),
            seed_page_type: crawler.seed_page_type.clone(),
            concurrency: crawler.concurrency.max(1) as usize,
            config_hash: String::new(),
        }
    }

    /// Enables AI-assisted selector discovery
    pub fn with_proposer(mut self, proposer: Arc<FieldProposer>) -> Self {
        self.ctx.proposer = Some(proposer);
        self
    }

    /// Records the configuration hash on new runs and checks it on resume
    pub fn with_config_hash(mut self, config_hash: impl Into<String>) -> Self {
        self.config_hash = config_hash.into();
        self
    }

    /// Uses an externally owned cancellation signal
    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.ctx.cancel = cancel;
        self
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.ctx.cancel.clone()
    }

    /// Runs the crawl until the frontier drains or the run is cancelled
    ///
    /// The frontier is checkpointed every `checkpoint-interval` processed items
    /// and once more at the end. Fetch and inference failures never abort the
    /// run; only storage failures while setting the run up do.
    pub async fn run(self, mode: StartMode) -> Result<RunSummary, ParsonicError> {
        let run_id = self.prepare_run(mode)?;
        self.enqueue_seeds();

        let concurrency = self.concurrency;
        let ctx = Arc::new(self.ctx);

        info!(
            "Starting crawl run {} with {} workers, {} URLs outstanding",
            run_id,
            concurrency,
            ctx.frontier.outstanding()
        );

        let mut workers = JoinSet::new();
        for worker_id in 0..concurrency {
            let ctx = Arc::clone(&ctx);
            workers.spawn(async move { ctx.worker_loop(worker_id).await });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Crawl worker stopped unexpectedly: {}", e);
            }
        }

        ctx.checkpoint();

        let cancelled = ctx.cancel.is_cancelled();
        let final_status = if cancelled {
            RunStatus::Interrupted
        } else {
            RunStatus::Completed
        };
        if let Err(e) = ctx.lock_storage().update_run_status(run_id, final_status) {
            error!("Failed to mark run {} as {}: {}", run_id, final_status.to_db_string(), e);
        }

        let summary = ctx.summary(run_id, cancelled);
        if cancelled {
            info!(
                "Crawl run {} interrupted after {} pages; checkpoint saved",
                run_id, summary.processed
            );
        } else {
            info!(
                "Crawl completed: {} pages processed in {:?}",
                summary.processed, summary.elapsed
            );
        }

        Ok(summary)
    }

    /// Creates or resumes the run and loads its checkpoint
    fn prepare_run(&self, mode: StartMode) -> Result<i64, ParsonicError> {
        let mut storage = self.ctx.lock_storage();

        if mode == StartMode::Resume {
            if let Some(run) = storage.get_latest_run()? {
                if run.status.is_resumable() {
                    if !self.config_hash.is_empty() && run.config_hash != self.config_hash {
                        warn!(
                            "Configuration changed since run {} started; resuming anyway",
                            run.id
                        );
                    }

                    let checkpoint = storage.load_checkpoint()?;
                    let restored = self.ctx.frontier.restore(checkpoint);
                    storage.update_run_status(run.id, RunStatus::Running)?;
                    info!("Resuming run {} with {} checkpointed URLs", run.id, restored);
                    return Ok(run.id);
                }
            }
            info!("No resumable run found, starting new run");
        } else {
            info!("Starting fresh run (clearing previous frontier)");
            storage.clear_frontier()?;
        }

        Ok(storage.create_run(&self.config_hash)?)
    }

    fn enqueue_seeds(&self) {
        for seed in &self.seeds {
            let domain = match normalize_url(seed) {
                Ok(url) => extract_domain(&url),
                Err(e) => {
                    warn!("Skipping seed {}: {}", seed, e);
                    continue;
                }
            };
            let Some(domain) = domain else {
                warn!("Skipping seed {}: no host", seed);
                continue;
            };

            if self
                .ctx
                .frontier
                .enqueue(seed, 0, &domain, &self.seed_page_type, None)
            {
                debug!("Seeded {}", seed);
            }
        }
    }
}

impl CrawlContext {
    async fn worker_loop(&self, worker_id: usize) {
        trace!("Worker {} started", worker_id);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.frontier.next_ready(Utc::now()) {
                Some(item) => self.process(item).await,
                None if self.frontier.is_drained() => break,
                None => {
                    tokio::select! {
                        _ = self.frontier.wait_for_work() => {}
                        _ = self.cancel.cancelled() => {}
                    }
                }
            }
        }

        trace!("Worker {} finished", worker_id);
    }

    /// Processes one frontier item and settles its status
    async fn process(&self, item: FrontierItem) {
        debug!("Processing URL: {} (depth {})", item.url, item.depth);

        match self.visit(&item).await {
            Ok(()) => {
                self.frontier.complete_success(&item.identity);
                RunCounters::bump(&self.counters.succeeded);
            }
            Err(e) => {
                match self.frontier.complete_failure(&item.identity, &e, &self.retry) {
                    FrontierStatus::FailedRetryable => {
                        RunCounters::bump(&self.counters.retried);
                        debug!("{} failed, will retry: {}", item.url, e);
                    }
                    _ => {
                        RunCounters::bump(&self.counters.failed);
                        info!("{} failed permanently: {}", item.url, e);
                    }
                }
            }
        }

        let processed = RunCounters::bump(&self.counters.processed);
        if processed % self.checkpoint_interval == 0 {
            self.checkpoint();
        }
        if processed % 10 == 0 {
            let rate = processed as f64 / self.started.elapsed().as_secs_f64().max(0.001);
            info!(
                "Progress: {} pages processed, {} outstanding, {:.2} pages/sec",
                processed,
                self.frontier.outstanding(),
                rate
            );
        }
    }

    /// Fetch, extract, persist and follow links for one item
    async fn visit(&self, item: &FrontierItem) -> Result<(), FetchError> {
        let url = Url::parse(&item.url)
            .map_err(|e| FetchError::Permanent(format!("malformed URL: {}", e)))?;

        if let Some(robots) = &self.robots {
            if !robots.is_allowed(self.fetcher.as_ref(), &url).await {
                return Err(FetchError::Permanent("disallowed by robots.txt".to_string()));
            }
        }

        self.limiter.acquire().await;
        let started = Instant::now();
        let fetched = self.fetcher.fetch(&url, self.fetch_mode).await;
        self.limiter.record_response(
            fetched.as_ref().ok().map(|page| page.status_code),
            started.elapsed(),
        );

        let page = fetched?;
        if let Some(e) = classify_status(page.status_code) {
            return Err(e);
        }

        let extraction = self.extract_page(&page, item).await;
        self.store(&extraction, item);
        self.follow_links(&extraction.links, item);

        Ok(())
    }

    /// Extracts a page, resolving reveals and asking the proposer when short
    async fn extract_page(&self, page: &FetchedPage, item: &FrontierItem) -> Extraction {
        let selectors = self.selectors.snapshot();
        let mut extraction =
            self.engine
                .extract(&page.body, &page.final_url, &selectors, &item.page_type);
        for warning in &extraction.warnings {
            warn!("{}: {}", item.url, warning);
        }
        self.resolve_reveals(page, &mut extraction).await;

        let Some(proposer) = &self.proposer else {
            return extraction;
        };
        if extraction.record.field_count() >= self.min_fields {
            return extraction;
        }

        debug!(
            "{} yielded {} field(s), asking for selectors",
            item.url,
            extraction.record.field_count()
        );
        let proposals = proposer
            .propose(&page.body, page.screenshot.as_deref(), &item.page_type)
            .await;
        if proposals.is_empty() {
            return extraction;
        }

        let selectors = self.selectors.snapshot();
        let mut retried =
            self.engine
                .extract(&page.body, &page.final_url, &selectors, &item.page_type);
        self.resolve_reveals(page, &mut retried).await;

        if retried.record.field_count() >= extraction.record.field_count() {
            retried
        } else {
            extraction
        }
    }

    /// Triggers every pending reveal and re-reads the revealed fields
    ///
    /// A failed reveal keeps the control's own value.
    async fn resolve_reveals(&self, page: &FetchedPage, extraction: &mut Extraction) {
        for request in std::mem::take(&mut extraction.reveals) {
            match self.fetcher.trigger_reveal(page, &request.target()).await {
                Ok(content) => {
                    if let Some(value) = self.engine.read_field(&content, &request.selector) {
                        extraction.record.fields.insert(request.field.clone(), value);
                    }
                }
                Err(e) => debug!("Reveal of '{}' failed: {}", request.field, e),
            }
        }
    }

    fn store(&self, extraction: &Extraction, item: &FrontierItem) {
        let outcome = self.lock_storage().submit(&extraction.record);
        match outcome {
            Ok(SubmitOutcome::Inserted) => {
                RunCounters::bump(&self.counters.inserted);
                debug!("New record from {}", item.url);
            }
            Ok(SubmitOutcome::Updated { version }) => {
                RunCounters::bump(&self.counters.updated);
                debug!("Merged record from {} (version {})", item.url, version);
            }
            Ok(SubmitOutcome::Rejected) => {
                RunCounters::bump(&self.counters.rejected);
                trace!("No record on {}", item.url);
            }
            Err(e) => error!("Failed to store record from {}: {}", item.url, e),
        }
    }

    fn follow_links(&self, links: &[DiscoveredLink], item: &FrontierItem) {
        let mut added = 0;
        for link in links {
            if !self.scope.permits(&item.origin_domain, &link.url) {
                trace!("Out of scope: {}", link.url);
                continue;
            }

            let page_type = match link.kind {
                LinkKind::Detail => DETAIL_PAGE_TYPE,
                LinkKind::Pagination => item.page_type.as_str(),
            };

            if self.frontier.enqueue(
                link.url.as_str(),
                item.depth + 1,
                &item.origin_domain,
                page_type,
                Some(&item.identity),
            ) {
                added += 1;
            }
        }

        if added > 0 {
            debug!("Queued {} new URLs from {}", added, item.url);
        }
    }

    /// Writes the frontier snapshot, replacing the previous one
    fn checkpoint(&self) {
        let snapshot = self.frontier.snapshot();
        match self.lock_storage().save_checkpoint(&snapshot) {
            Ok(()) => debug!("Checkpointed {} frontier items", snapshot.len()),
            Err(e) => error!("Failed to checkpoint frontier: {}", e),
        }
    }

    fn summary(&self, run_id: i64, cancelled: bool) -> RunSummary {
        let counters = &self.counters;
        RunSummary {
            run_id,
            processed: RunCounters::get(&counters.processed),
            succeeded: RunCounters::get(&counters.succeeded),
            failed: RunCounters::get(&counters.failed),
            retried: RunCounters::get(&counters.retried),
            inserted: RunCounters::get(&counters.inserted),
            updated: RunCounters::get(&counters.updated),
            rejected: RunCounters::get(&counters.rejected),
            ai: self
                .proposer
                .as_ref()
                .map(|p| p.stats())
                .unwrap_or_default(),
            cancelled,
            elapsed: self.started.elapsed(),
        }
    }

    fn lock_storage(&self) -> MutexGuard<'_, SqliteStorage> {
        self.storage.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
