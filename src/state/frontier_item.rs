use crate::state::FrontierStatus;
use crate::url::url_identity;
use chrono::{DateTime, Utc};

/// One URL tracked by the frontier
#[derive(Debug, Clone, PartialEq)]
pub struct FrontierItem {
    /// Absolute URL as discovered, fragment removed; this is what gets fetched
    pub url: String,
    /// Normalized form of `url`, used only for dedup and as the checkpoint key
    pub identity: String,
    pub depth: u32,
    pub origin_domain: String,
    pub status: FrontierStatus,
    pub attempt_count: u32,
    /// Identity of the page this URL was found on, None for seeds
    pub discovered_from: Option<String>,
    pub page_type: String,
    /// Earliest time a FailedRetryable item may be attempted again
    pub not_before: Option<DateTime<Utc>>,
}

impl FrontierItem {
    /// Creates a pending item; an unparsable `url` is its own identity
    pub fn new(url: String, depth: u32, origin_domain: String, page_type: String) -> Self {
        let identity = url_identity(&url).unwrap_or_else(|_| url.clone());
        Self {
            url,
            identity,
            depth,
            origin_domain,
            status: FrontierStatus::Pending,
            attempt_count: 0,
            discovered_from: None,
            page_type,
            not_before: None,
        }
    }

    /// True if a worker may pick the item up at `now`
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            FrontierStatus::Pending => true,
            FrontierStatus::FailedRetryable => self.not_before.map_or(true, |t| t <= now),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item() -> FrontierItem {
        FrontierItem::new(
            "https://a.test/".to_string(),
            0,
            "a.test".to_string(),
            "listing".to_string(),
        )
    }

    #[test]
    fn test_identity_is_separate_from_fetch_url() {
        let item = FrontierItem::new(
            "https://A.test/dir/?b=2&a=1".to_string(),
            0,
            "a.test".to_string(),
            "listing".to_string(),
        );
        assert_eq!(item.url, "https://A.test/dir/?b=2&a=1");
        assert_eq!(item.identity, "https://a.test/dir?a=1&b=2");
    }

    #[test]
    fn test_new_item_is_pending_and_ready() {
        let item = item();
        assert_eq!(item.status, FrontierStatus::Pending);
        assert!(item.is_ready(Utc::now()));
    }

    #[test]
    fn test_retryable_waits_for_backoff() {
        let now = Utc::now();
        let mut item = item();
        item.status = FrontierStatus::FailedRetryable;
        item.not_before = Some(now + Duration::seconds(5));

        assert!(!item.is_ready(now));
        assert!(item.is_ready(now + Duration::seconds(5)));
    }

    #[test]
    fn test_terminal_items_never_ready() {
        let mut item = item();
        item.status = FrontierStatus::Succeeded;
        assert!(!item.is_ready(Utc::now()));
        item.status = FrontierStatus::InFlight;
        assert!(!item.is_ready(Utc::now()));
    }
}
