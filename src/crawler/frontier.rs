//! Crawl frontier: deduplicated FIFO work queue with retry scheduling
//!
//! Every URL the crawl ever accepted stays in the frontier under its identity,
//! including finished ones, so rediscovered links are ignored. Items that can
//! still run sit in a FIFO ready order; failed-retryable items wait there
//! until their `not_before` passes.

use crate::config::CrawlerConfig;
use crate::crawler::fetcher::FetchError;
use crate::state::{FrontierItem, FrontierStatus};
use crate::url::url_identity;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};
use url::Url;

/// Longest a worker sleeps before looking at the frontier again
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Retry limits and backoff for failed fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the next try of an item that has failed `attempts` times
    ///
    /// `base_delay × 2^(attempts - 1)`, capped at `max_delay`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

impl From<&CrawlerConfig> for RetryPolicy {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_retry_delay_ms),
            max_delay: Duration::from_millis(config.max_retry_delay_ms),
        }
    }
}

#[derive(Debug, Default)]
struct FrontierInner {
    items: HashMap<String, FrontierItem>,
    /// Identities in first-seen order
    seen_order: Vec<String>,
    /// Pending and failed-retryable identities in dispatch order
    ready: VecDeque<String>,
    in_flight: usize,
}

/// Shared crawl frontier
#[derive(Debug)]
pub struct Frontier {
    inner: Mutex<FrontierInner>,
    max_depth: u32,
    changed: Notify,
}

impl Frontier {
    pub fn new(max_depth: u32) -> Self {
        Self {
            inner: Mutex::new(FrontierInner::default()),
            max_depth,
            changed: Notify::new(),
        }
    }

    /// Adds a URL if its identity is new and `depth <= max_depth`
    ///
    /// The item keeps the URL as given, minus its fragment, for fetching; the
    /// identity only decides dedup. Returns false when the URL was ignored:
    /// too deep, unparsable, or already known in any state.
    pub fn enqueue(
        &self,
        url: &str,
        depth: u32,
        origin_domain: &str,
        page_type: &str,
        discovered_from: Option<&str>,
    ) -> bool {
        if depth > self.max_depth {
            trace!("Ignoring {} at depth {} (max {})", url, depth, self.max_depth);
            return false;
        }

        let identity = match url_identity(url) {
            Ok(identity) => identity,
            Err(e) => {
                debug!("Ignoring unusable URL {}: {}", url, e);
                return false;
            }
        };
        let fetch_url = match Url::parse(url.trim()) {
            Ok(mut parsed) => {
                parsed.set_fragment(None);
                parsed.to_string()
            }
            Err(e) => {
                debug!("Ignoring unusable URL {}: {}", url, e);
                return false;
            }
        };

        let mut inner = self.lock();
        if inner.items.contains_key(&identity) {
            return false;
        }

        let mut item = FrontierItem::new(
            fetch_url,
            depth,
            origin_domain.to_string(),
            page_type.to_string(),
        );
        item.identity = identity.clone();
        item.discovered_from = discovered_from.map(str::to_string);

        inner.items.insert(identity.clone(), item);
        inner.seen_order.push(identity.clone());
        inner.ready.push_back(identity);
        drop(inner);

        self.changed.notify_waiters();
        true
    }

    /// Takes the first item that may run at `now` and marks it in flight
    pub fn next_ready(&self, now: DateTime<Utc>) -> Option<FrontierItem> {
        let mut inner = self.lock();
        let FrontierInner {
            items,
            ready,
            in_flight,
            ..
        } = &mut *inner;

        let position = ready
            .iter()
            .position(|id| items.get(id).is_some_and(|item| item.is_ready(now)))?;
        let identity = ready.remove(position)?;
        let item = items.get_mut(&identity)?;

        item.status = FrontierStatus::InFlight;
        *in_flight += 1;
        Some(item.clone())
    }

    /// Marks an in-flight item as done
    pub fn complete_success(&self, identity: &str) {
        self.finish(identity, |item| {
            item.status = FrontierStatus::Succeeded;
            item.not_before = None;
            false
        });
    }

    /// Records a failed attempt and returns the item's new status
    ///
    /// Permanent errors end the item immediately. Retryable errors send it back
    /// to the ready order with a backoff, until `max_attempts` is reached.
    pub fn complete_failure(
        &self,
        identity: &str,
        error: &FetchError,
        policy: &RetryPolicy,
    ) -> FrontierStatus {
        let now = Utc::now();
        let mut status = FrontierStatus::FailedPermanent;

        self.finish(identity, |item| {
            item.attempt_count += 1;
            if error.is_retryable() && item.attempt_count < policy.max_attempts {
                let delay = policy.backoff(item.attempt_count);
                item.status = FrontierStatus::FailedRetryable;
                item.not_before = chrono::Duration::from_std(delay).ok().map(|d| now + d);
                debug!(
                    "Retrying {} in {:?} (attempt {}/{})",
                    item.url, delay, item.attempt_count, policy.max_attempts
                );
            } else {
                item.status = FrontierStatus::FailedPermanent;
                item.not_before = None;
            }
            status = item.status;
            item.status == FrontierStatus::FailedRetryable
        });

        status
    }

    fn finish(&self, identity: &str, update: impl FnOnce(&mut FrontierItem) -> bool) {
        let mut inner = self.lock();
        let Some(item) = inner.items.get_mut(identity) else {
            return;
        };
        if item.status != FrontierStatus::InFlight {
            return;
        }

        let requeue = update(item);
        inner.in_flight = inner.in_flight.saturating_sub(1);
        if requeue {
            inner.ready.push_back(identity.to_string());
        }
        drop(inner);

        self.changed.notify_waiters();
    }

    /// True when nothing is pending, waiting for retry, or in flight
    pub fn is_drained(&self) -> bool {
        let inner = self.lock();
        inner.ready.is_empty() && inner.in_flight == 0
    }

    /// Time until the earliest waiting item becomes ready
    ///
    /// `None` when nothing is waiting.
    pub fn next_wakeup(&self, now: DateTime<Utc>) -> Option<Duration> {
        let inner = self.lock();
        inner
            .ready
            .iter()
            .filter_map(|id| inner.items.get(id))
            .map(|item| match item.not_before {
                Some(t) if t > now => (t - now).to_std().unwrap_or(Duration::ZERO),
                _ => Duration::ZERO,
            })
            .min()
    }

    /// Waits until the frontier changes or a retry may have become ready
    pub async fn wait_for_work(&self) {
        let notified = self.changed.notified();
        let wait = self
            .next_wakeup(Utc::now())
            .map_or(IDLE_POLL, |d| d.min(IDLE_POLL));

        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(wait) => {}
        }
    }

    /// Every tracked item, in an order that preserves dispatch order on restore
    ///
    /// In-flight items come first, then the ready order, then finished items.
    pub fn snapshot(&self) -> Vec<FrontierItem> {
        let inner = self.lock();
        let mut items = Vec::with_capacity(inner.items.len());

        items.extend(
            inner
                .seen_order
                .iter()
                .filter_map(|id| inner.items.get(id))
                .filter(|item| item.status == FrontierStatus::InFlight)
                .cloned(),
        );
        items.extend(
            inner
                .ready
                .iter()
                .filter_map(|id| inner.items.get(id))
                .cloned(),
        );
        items.extend(
            inner
                .seen_order
                .iter()
                .filter_map(|id| inner.items.get(id))
                .filter(|item| item.status.is_terminal())
                .cloned(),
        );

        items
    }

    /// Replaces the frontier with a checkpoint snapshot
    ///
    /// In-flight items come back as pending; finished items stay finished and
    /// keep blocking rediscovery.
    pub fn restore(&self, snapshot: Vec<FrontierItem>) -> usize {
        let mut inner = self.lock();
        *inner = FrontierInner::default();

        for mut item in snapshot {
            item.status = item.status.on_resume();
            let identity = item.identity.clone();
            if inner.items.contains_key(&identity) {
                continue;
            }
            if !item.status.is_terminal() {
                inner.ready.push_back(identity.clone());
            }
            inner.seen_order.push(identity.clone());
            inner.items.insert(identity, item);
        }

        let restored = inner.items.len();
        drop(inner);

        self.changed.notify_waiters();
        restored
    }

    /// Item count per status
    pub fn counts(&self) -> HashMap<FrontierStatus, usize> {
        let inner = self.lock();
        let mut counts = HashMap::new();
        for item in inner.items.values() {
            *counts.entry(item.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of items that can still run
    pub fn outstanding(&self) -> usize {
        let inner = self.lock();
        inner.ready.len() + inner.in_flight
    }

    pub fn get(&self, identity: &str) -> Option<FrontierItem> {
        self.lock().items.get(identity).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, FrontierInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(3000),
        }
    }

    fn seed(frontier: &Frontier, url: &str) -> bool {
        frontier.enqueue(url, 0, "a.test", "listing", None)
    }

    fn retryable() -> FetchError {
        FetchError::Retryable("HTTP 503".to_string())
    }

    #[test]
    fn test_enqueue_dedups_by_identity() {
        let frontier = Frontier::new(3);
        assert!(seed(&frontier, "https://a.test/x?b=1&a=2#frag"));
        assert!(!seed(&frontier, "https://A.test/x?a=2&b=1"));
        assert!(!seed(&frontier, "https://a.test/x?a=2&b=1&utm_source=mail"));
        assert!(seed(&frontier, "https://a.test/y"));
        assert_eq!(frontier.len(), 2);
    }

    #[test]
    fn test_enqueue_keeps_url_as_given() {
        let frontier = Frontier::new(3);
        assert!(seed(&frontier, "https://a.test/dir/?b=1&a=2#top"));
        assert!(!seed(&frontier, "https://a.test/dir?a=2&b=1"));

        let item = frontier.next_ready(Utc::now()).unwrap();
        assert_eq!(item.url, "https://a.test/dir/?b=1&a=2");
        assert_eq!(item.identity, "https://a.test/dir?a=2&b=1");
        assert!(frontier.get(&item.identity).is_some());
    }

    #[test]
    fn test_enqueue_respects_max_depth() {
        let frontier = Frontier::new(1);
        assert!(frontier.enqueue("https://a.test/1", 1, "a.test", "detail", None));
        assert!(!frontier.enqueue("https://a.test/2", 2, "a.test", "detail", None));
        assert!(!frontier.enqueue("not a url", 0, "a.test", "detail", None));
    }

    #[test]
    fn test_fifo_dispatch_and_in_flight() {
        let frontier = Frontier::new(3);
        seed(&frontier, "https://a.test/1");
        seed(&frontier, "https://a.test/2");

        let now = Utc::now();
        let first = frontier.next_ready(now).unwrap();
        assert_eq!(first.url, "https://a.test/1");
        assert_eq!(first.status, FrontierStatus::InFlight);
        assert_eq!(frontier.next_ready(now).unwrap().url, "https://a.test/2");
        assert!(frontier.next_ready(now).is_none());
        assert!(!frontier.is_drained());

        frontier.complete_success("https://a.test/1");
        frontier.complete_success("https://a.test/2");
        assert!(frontier.is_drained());
        assert!(!seed(&frontier, "https://a.test/1"));
    }

    #[test]
    fn test_retry_cap_marks_permanent() {
        let frontier = Frontier::new(3);
        seed(&frontier, "https://a.test/flaky");
        let id = "https://a.test/flaky";

        let mut now = Utc::now();
        for expected in [FrontierStatus::FailedRetryable, FrontierStatus::FailedRetryable] {
            let item = frontier.next_ready(now).unwrap();
            assert_eq!(frontier.complete_failure(&item.identity, &retryable(), &policy()), expected);
            now += chrono::Duration::seconds(10);
        }

        frontier.next_ready(now).unwrap();
        assert_eq!(
            frontier.complete_failure(id, &retryable(), &policy()),
            FrontierStatus::FailedPermanent
        );

        let item = frontier.get(id).unwrap();
        assert_eq!(item.attempt_count, 3);
        assert!(frontier.is_drained());
    }

    #[test]
    fn test_retry_waits_for_backoff() {
        let frontier = Frontier::new(3);
        seed(&frontier, "https://a.test/slow");

        let now = Utc::now();
        let item = frontier.next_ready(now).unwrap();
        frontier.complete_failure(&item.identity, &retryable(), &policy());

        assert!(frontier.next_ready(now).is_none());
        assert!(!frontier.is_drained());
        let wakeup = frontier.next_wakeup(now).unwrap();
        assert!(wakeup > Duration::from_millis(900) && wakeup <= Duration::from_millis(1100));

        let later = now + chrono::Duration::seconds(2);
        assert_eq!(frontier.next_ready(later).unwrap().attempt_count, 1);
    }

    #[test]
    fn test_permanent_error_is_final() {
        let frontier = Frontier::new(3);
        seed(&frontier, "https://a.test/gone");
        let item = frontier.next_ready(Utc::now()).unwrap();

        let status = frontier.complete_failure(
            &item.identity,
            &FetchError::Permanent("HTTP 404".to_string()),
            &policy(),
        );
        assert_eq!(status, FrontierStatus::FailedPermanent);
        assert!(frontier.is_drained());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(3), Duration::from_millis(3000));
        assert_eq!(policy.backoff(40), Duration::from_millis(3000));
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let frontier = Frontier::new(3);
        for n in 1..=4 {
            seed(&frontier, &format!("https://a.test/{}", n));
        }
        let now = Utc::now();
        let done = frontier.next_ready(now).unwrap();
        frontier.complete_success(&done.identity);
        let running = frontier.next_ready(now).unwrap();

        let snapshot = frontier.snapshot();
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot[0].identity, running.identity);

        let resumed = Frontier::new(3);
        assert_eq!(resumed.restore(snapshot), 4);

        let order: Vec<String> = std::iter::from_fn(|| resumed.next_ready(now))
            .map(|item| item.url)
            .collect();
        assert_eq!(
            order,
            vec!["https://a.test/2", "https://a.test/3", "https://a.test/4"]
        );
        assert_eq!(
            resumed.get("https://a.test/1").unwrap().status,
            FrontierStatus::Succeeded
        );
        assert!(!seed(&resumed, "https://a.test/1"));
    }

    #[test]
    fn test_counts_by_status() {
        let frontier = Frontier::new(3);
        seed(&frontier, "https://a.test/1");
        seed(&frontier, "https://a.test/2");
        let item = frontier.next_ready(Utc::now()).unwrap();
        frontier.complete_success(&item.identity);

        let counts = frontier.counts();
        assert_eq!(counts[&FrontierStatus::Succeeded], 1);
        assert_eq!(counts[&FrontierStatus::Pending], 1);
        assert_eq!(frontier.outstanding(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_work_wakes_on_enqueue() {
        let frontier = std::sync::Arc::new(Frontier::new(3));
        let waiter = {
            let frontier = frontier.clone();
            tokio::spawn(async move { frontier.wait_for_work().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        seed(&frontier, "https://a.test/new");
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
