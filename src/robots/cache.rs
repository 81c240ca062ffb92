//! Per-origin robots.txt cache
//!
//! Entries expire after 24 hours. Concurrent lookups for the same origin wait
//! on a single fetch.

use crate::config::FetchMode;
use crate::crawler::{classify_status, PageFetcher};
use crate::robots::RobotsRules;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};
use url::Url;

/// Robots rules plus the time they were fetched
#[derive(Debug, Clone)]
struct CachedRules {
    rules: RobotsRules,
    fetched_at: DateTime<Utc>,
}

impl CachedRules {
    fn new(rules: RobotsRules) -> Self {
        Self {
            rules,
            fetched_at: Utc::now(),
        }
    }

    fn is_stale(&self) -> bool {
        Utc::now() - self.fetched_at > Duration::hours(24)
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<CachedRules>>>;

/// Caches robots.txt per origin (scheme, host and port)
#[derive(Debug)]
pub struct RobotsCache {
    user_agent: String,
    slots: Mutex<HashMap<String, Slot>>,
}

impl RobotsCache {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Checks `url` against its origin's robots.txt, fetching it if needed
    ///
    /// A robots.txt that is missing, errors, or cannot be fetched allows
    /// everything.
    pub async fn is_allowed(&self, fetcher: &dyn PageFetcher, url: &Url) -> bool {
        let origin = url.origin().ascii_serialization();
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(origin.clone()).or_default())
        };

        let mut entry = slot.lock().await;
        let fresh = entry.as_ref().is_some_and(|cached| !cached.is_stale());
        if !fresh {
            let rules = fetch_rules(fetcher, &origin).await;
            *entry = Some(CachedRules::new(rules));
        }

        entry
            .as_ref()
            .map_or(true, |cached| cached.rules.is_allowed(url.as_str(), &self.user_agent))
    }

    /// Number of origins with cached rules
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn fetch_rules(fetcher: &dyn PageFetcher, origin: &str) -> RobotsRules {
    let robots_url = match Url::parse(&format!("{}/robots.txt", origin)) {
        Ok(url) => url,
        Err(e) => {
            debug!("No robots.txt URL for {}: {}", origin, e);
            return RobotsRules::allow_all();
        }
    };

    debug!("Fetching {}", robots_url);
    match fetcher.fetch(&robots_url, FetchMode::Static).await {
        Ok(page) => match classify_status(page.status_code) {
            None => {
                info!("Loaded robots.txt for {}", origin);
                RobotsRules::from_content(&page.body)
            }
            Some(e) => {
                debug!("robots.txt for {} unavailable ({}), allowing all", origin, e);
                RobotsRules::allow_all()
            }
        },
        Err(e) => {
            debug!("robots.txt for {} failed ({}), allowing all", origin, e);
            RobotsRules::allow_all()
        }
    }
}
