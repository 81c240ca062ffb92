//! Page fetcher boundary and the HTTP implementation
//!
//! This module handles all page requests for the crawler, including:
//! - The [`PageFetcher`] capability (static and rendered modes, reveal)
//! - Classification of failures into retryable and permanent
//! - Identity rotation and extra headers in stealth mode
//! - Proxy rotation with failed-proxy exclusion

use crate::config::{FetchMode, FetcherConfig};
use crate::extract::RevealTarget;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{redirect::Policy, Client, Proxy};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// A fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// HTTP status code of the final response
    pub status_code: u16,
    /// Page body
    pub body: String,
    /// URL after redirects
    pub final_url: Url,
    /// PNG screenshot, only produced by rendering fetchers
    pub screenshot: Option<Vec<u8>>,
}

/// Errors that can occur while fetching a page
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Worth trying again later (timeouts, resets, 5xx, 429, 408)
    #[error("retryable fetch failure: {0}")]
    Retryable(String),

    /// Will not succeed on retry (other 4xx, malformed URL, robots disallow)
    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Classifies an HTTP status code
///
/// # Retry Logic
///
/// | Status | Result |
/// |--------|--------|
/// | 2xx | `None` (success) |
/// | 408, 429 | Retryable |
/// | 5xx | Retryable |
/// | anything else | Permanent |
pub fn classify_status(status_code: u16) -> Option<FetchError> {
    match status_code {
        200..=299 => None,
        408 | 429 | 500..=599 => Some(FetchError::Retryable(format!("HTTP {}", status_code))),
        _ => Some(FetchError::Permanent(format!("HTTP {}", status_code))),
    }
}

/// Classifies a transport-level reqwest error
fn classify_reqwest_error(e: &reqwest::Error) -> FetchError {
    if e.is_builder() || e.is_redirect() {
        FetchError::Permanent(e.to_string())
    } else if e.is_timeout() {
        FetchError::Retryable("Request timeout".to_string())
    } else if e.is_connect() {
        FetchError::Retryable(format!("Connection failed: {}", e))
    } else {
        // Resets and truncated bodies
        FetchError::Retryable(e.to_string())
    }
}

/// Anything that can turn a URL into page content
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches `url`
    ///
    /// Any HTTP response is returned as a page, whatever its status; errors are
    /// reserved for requests that produced no response.
    async fn fetch(&self, url: &Url, mode: FetchMode) -> Result<FetchedPage, FetchError>;

    /// Activates a reveal control and returns the updated page content
    async fn trigger_reveal(
        &self,
        page: &FetchedPage,
        target: &RevealTarget,
    ) -> Result<String, FetchError>;
}

/// A client that sends every request through one proxy
#[derive(Debug, Clone)]
struct ProxyRoute {
    url: String,
    client: Client,
}

/// Static-mode fetcher built on reqwest
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    proxies: Vec<ProxyRoute>,
    /// Indexes into `proxies` that failed to connect
    failed_proxies: Arc<Mutex<HashSet<usize>>>,
    rotate_proxies: bool,
    user_agents: Vec<String>,
    rotate_identity: bool,
}

impl HttpFetcher {
    /// Builds a fetcher from configuration
    ///
    /// In stealth mode every request picks a random configured user agent;
    /// otherwise the first one is always used.
    pub fn from_config(config: &FetcherConfig, stealth: bool) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("Skipping invalid header {}: {}", name, value),
            }
        }

        let builder = || {
            Client::builder()
                .default_headers(headers.clone())
                .timeout(Duration::from_secs(config.timeout_secs))
                .connect_timeout(Duration::from_secs(10))
                .redirect(Policy::limited(10))
                .gzip(true)
                .brotli(true)
        };

        let proxies = config
            .proxies
            .iter()
            .map(|url| -> Result<ProxyRoute, reqwest::Error> {
                Ok(ProxyRoute {
                    url: url.clone(),
                    client: builder().proxy(Proxy::all(url.as_str())?).build()?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if !proxies.is_empty() {
            debug!(
                "Fetching through {} proxies (rotate: {})",
                proxies.len(),
                config.rotate_proxies
            );
        }

        Ok(Self {
            client: builder().build()?,
            proxies,
            failed_proxies: Arc::new(Mutex::new(HashSet::new())),
            rotate_proxies: config.rotate_proxies,
            user_agents: config.user_agents.clone(),
            rotate_identity: stealth,
        })
    }

    /// Number of configured proxies not currently marked failed
    pub fn healthy_proxies(&self) -> usize {
        self.proxies.len() - self.lock_failed().len()
    }

    fn lock_failed(&self) -> MutexGuard<'_, HashSet<usize>> {
        self.failed_proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Picks the client for the next request
    ///
    /// Returns the proxy index alongside the client, `None` for a direct
    /// connection. When every proxy has failed the failed list is cleared.
    fn pick_route(&self) -> (Option<usize>, &Client) {
        if self.proxies.is_empty() {
            return (None, &self.client);
        }

        let mut failed = self.lock_failed();
        if failed.len() >= self.proxies.len() {
            warn!("All {} proxies have failed, trying them again", self.proxies.len());
            failed.clear();
        }

        let healthy: Vec<usize> = (0..self.proxies.len())
            .filter(|index| !failed.contains(index))
            .collect();
        let picked = if self.rotate_proxies {
            healthy.choose(&mut rand::thread_rng()).copied()
        } else {
            healthy.first().copied()
        };

        match picked {
            Some(index) => (Some(index), &self.proxies[index].client),
            None => (None, &self.client),
        }
    }

    fn mark_proxy_failed(&self, index: usize) {
        if self.lock_failed().insert(index) {
            warn!("Proxy {} failed to connect, skipping it", self.proxies[index].url);
        }
    }

    fn pick_user_agent(&self) -> Option<&str> {
        if self.rotate_identity {
            self.user_agents
                .choose(&mut rand::thread_rng())
                .map(String::as_str)
        } else {
            self.user_agents.first().map(String::as_str)
        }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, mode: FetchMode) -> Result<FetchedPage, FetchError> {
        if mode == FetchMode::Rendered {
            debug!("No renderer attached, fetching {} statically", url);
        }

        let (proxy, client) = self.pick_route();
        let mut request = client.get(url.clone());
        if let Some(agent) = self.pick_user_agent() {
            request = request.header(USER_AGENT, agent);
        }

        let response = request.send().await.map_err(|e| {
            if let (Some(index), true) = (proxy, e.is_connect()) {
                self.mark_proxy_failed(index);
            }
            classify_reqwest_error(&e)
        })?;

        let status_code = response.status().as_u16();
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        Ok(FetchedPage {
            status_code,
            body,
            final_url,
            screenshot: None,
        })
    }

    async fn trigger_reveal(
        &self,
        _page: &FetchedPage,
        target: &RevealTarget,
    ) -> Result<String, FetchError> {
        Err(FetchError::Permanent(format!(
            "reveal of '{}' needs a rendering fetcher",
            target.css
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> FetcherConfig {
        let mut headers = BTreeMap::new();
        headers.insert("Accept-Language".to_string(), "en-US".to_string());
        FetcherConfig {
            timeout_secs: 5,
            user_agents: vec!["TestAgent/1.0".to_string()],
            headers,
            ..FetcherConfig::default()
        }
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(200), None);
        assert_eq!(classify_status(204), None);
        assert!(classify_status(408).unwrap().is_retryable());
        assert!(classify_status(429).unwrap().is_retryable());
        assert!(classify_status(503).unwrap().is_retryable());
        assert!(!classify_status(404).unwrap().is_retryable());
        assert!(!classify_status(403).unwrap().is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_sends_identity_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header("user-agent", "TestAgent/1.0"))
            .and(header("accept-language", "en-US"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::from_config(&config(), false).unwrap();
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        let page = fetcher.fetch(&url, FetchMode::Static).await.unwrap();

        assert_eq!(page.status_code, 200);
        assert_eq!(page.body, "<html>ok</html>");
        assert_eq!(page.final_url, url);
        assert!(page.screenshot.is_none());
    }

    #[tokio::test]
    async fn test_error_status_is_returned_as_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::from_config(&config(), true).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let page = fetcher.fetch(&url, FetchMode::Rendered).await.unwrap();

        assert_eq!(page.status_code, 503);
        assert!(classify_status(page.status_code).unwrap().is_retryable());
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let fetcher = HttpFetcher::from_config(&config(), false).unwrap();
        let url = Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();
        let err = fetcher.fetch(&url, FetchMode::Static).await.unwrap_err();

        assert!(err.is_retryable());
    }

    fn dead_address() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://{}", listener.local_addr().unwrap())
    }

    fn with_proxies(proxies: Vec<String>, rotate_proxies: bool) -> HttpFetcher {
        let config = FetcherConfig {
            proxies,
            rotate_proxies,
            ..config()
        };
        HttpFetcher::from_config(&config, false).unwrap()
    }

    #[tokio::test]
    async fn test_requests_go_through_proxy() {
        let proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(ResponseTemplate::new(200).set_body_string("via proxy"))
            .expect(1)
            .mount(&proxy)
            .await;

        let fetcher = with_proxies(vec![proxy.uri()], false);
        let url = Url::parse("http://directory.invalid/page").unwrap();
        let page = fetcher.fetch(&url, FetchMode::Static).await.unwrap();

        assert_eq!(page.body, "via proxy");
        assert_eq!(fetcher.healthy_proxies(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_skipped() {
        let proxy = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&proxy)
            .await;

        let fetcher = with_proxies(vec![dead_address(), proxy.uri()], false);
        let url = Url::parse("http://directory.invalid/page").unwrap();

        let err = fetcher.fetch(&url, FetchMode::Static).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(fetcher.healthy_proxies(), 1);

        let page = fetcher.fetch(&url, FetchMode::Static).await.unwrap();
        assert_eq!(page.body, "ok");
        assert_eq!(fetcher.healthy_proxies(), 1);
    }

    #[tokio::test]
    async fn test_failed_proxies_are_retried_once_all_fail() {
        let fetcher = with_proxies(vec![dead_address()], true);
        let url = Url::parse("http://directory.invalid/page").unwrap();

        fetcher.fetch(&url, FetchMode::Static).await.unwrap_err();
        assert_eq!(fetcher.healthy_proxies(), 0);

        let (proxy, _) = fetcher.pick_route();
        assert_eq!(proxy, Some(0));
        assert_eq!(fetcher.healthy_proxies(), 1);
    }

    #[test]
    fn test_no_proxies_means_direct() {
        let fetcher = with_proxies(Vec::new(), true);
        assert_eq!(fetcher.pick_route().0, None);
        assert_eq!(fetcher.healthy_proxies(), 0);
    }

    #[tokio::test]
    async fn test_static_fetcher_cannot_reveal() {
        let fetcher = HttpFetcher::from_config(&config(), false).unwrap();
        let page = FetchedPage {
            status_code: 200,
            body: String::new(),
            final_url: Url::parse("https://a.test/").unwrap(),
            screenshot: None,
        };
        let target = RevealTarget {
            field: "phone".to_string(),
            css: ".show".to_string(),
        };

        assert!(matches!(
            fetcher.trigger_reveal(&page, &target).await,
            Err(FetchError::Permanent(_))
        ));
    }
}
