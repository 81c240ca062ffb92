use crate::extract::{
    ExtractionOptions, FieldSelector, LinkSelector, SelectorSet,
};
use serde::Deserialize;
use std::collections::BTreeMap;

/// Main configuration structure for Parsonic
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Seed URLs, enqueued at depth 0
    pub seeds: Vec<String>,
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub thermal: ThermalConfig,
    #[serde(default)]
    pub ai: AiConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub page_types: Vec<PageTypeConfig>,
}

impl Config {
    /// Builds the initial selector set from the configured page types
    pub fn selector_set(&self) -> SelectorSet {
        let mut set = SelectorSet::new();
        for page_type in &self.page_types {
            for (field, candidates) in &page_type.fields {
                for candidate in candidates {
                    set.add_field_selector(&page_type.name, field, candidate.clone());
                }
            }
            for link in &page_type.links {
                set.add_link_selector(&page_type.name, link.clone());
            }
        }
        set
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Maximum depth to crawl from seed URLs
    pub max_depth: u32,

    /// Number of concurrent workers
    pub concurrency: u32,

    /// Attempts before a retryable failure becomes permanent
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base of the exponential retry backoff (milliseconds)
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    /// Cap of the retry backoff (milliseconds)
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Processed items between frontier checkpoints
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,

    /// Fewer extracted fields than this triggers the AI proposer
    #[serde(default = "default_min_fields")]
    pub min_fields: usize,

    /// Only follow links on the page's own domain (plus `allowed-domains`)
    #[serde(default = "default_true")]
    pub same_domain_only: bool,

    /// Extra domain patterns links may lead to, e.g. "*.example.com"
    #[serde(default)]
    pub allowed_domains: Vec<String>,

    #[serde(default = "default_true")]
    pub respect_robots_txt: bool,

    /// Page type given to seed URLs
    #[serde(default = "default_seed_page_type")]
    pub seed_page_type: String,
}

/// Request pacing shared by all workers
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    /// Requests that may be issued back to back before pacing applies
    pub burst: u32,
    pub adaptive: bool,
    /// Responses slower than this count as slow (milliseconds)
    pub slow_threshold_ms: u64,
    /// Consecutive fast successes that halve the adaptive delay
    pub fast_streak: u32,
    pub max_extra_delay_ms: u64,
    /// Adds jitter to every acquire and rotates fetcher identities
    pub stealth: bool,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
            burst: 1,
            adaptive: true,
            slow_threshold_ms: 3000,
            fast_streak: 5,
            max_extra_delay_ms: 60_000,
            stealth: false,
            jitter_min_ms: 1000,
            jitter_max_ms: 3000,
        }
    }
}

/// Page fetching mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FetchMode {
    /// Plain HTTP GET
    #[default]
    Static,
    /// Script-executing render, served by an injected fetcher
    Rendered,
}

/// HTTP fetcher configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct FetcherConfig {
    pub mode: FetchMode,
    pub timeout_secs: u64,
    /// User agents; rotated per request in stealth mode, otherwise the first is used
    pub user_agents: Vec<String>,
    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
    /// Proxy URLs (http, https, socks5); empty means direct connections
    pub proxies: Vec<String>,
    /// Pick a random healthy proxy per request instead of the first healthy one
    pub rotate_proxies: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            mode: FetchMode::Static,
            timeout_secs: 30,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
            ],
            headers: BTreeMap::new(),
            proxies: Vec::new(),
            rotate_proxies: true,
        }
    }
}

/// Extraction configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ExtractionConfig {
    pub reveal_attribute: String,
    pub reveal_class: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        let options = ExtractionOptions::default();
        Self {
            reveal_attribute: options.reveal_attribute,
            reveal_class: options.reveal_class,
        }
    }
}

impl From<&ExtractionConfig> for ExtractionOptions {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            reveal_attribute: config.reveal_attribute.clone(),
            reveal_class: config.reveal_class.clone(),
        }
    }
}

/// Thermal gate configuration (degrees Celsius)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ThermalConfig {
    pub enabled: bool,
    pub cpu_threshold: f64,
    pub gpu_threshold: f64,
    /// Readings must drop this far below the threshold to ungate
    pub hysteresis_margin: f64,
    pub poll_interval_secs: u64,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_threshold: 85.0,
            gpu_threshold: 80.0,
            hysteresis_margin: 15.0,
            poll_interval_secs: 3,
        }
    }
}

/// AI field proposer configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AiConfig {
    pub enabled: bool,
    /// Base URL of the Ollama server
    pub host: String,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
    pub min_confidence: f64,
    /// Consecutive failures that start a cooldown
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    /// Send a screenshot along with the content when the fetcher provides one
    pub visual: bool,
    /// Character budget for simplified page content
    pub max_content_chars: usize,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder:7b".to_string(),
            timeout_secs: 30,
            temperature: 0.3,
            max_tokens: 2048,
            min_confidence: 0.5,
            failure_threshold: 3,
            cooldown_secs: 300,
            visual: false,
            max_content_chars: 8000,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the SQLite database file
    pub database_path: String,
}

/// Selectors for one page type
#[derive(Debug, Clone, Deserialize)]
pub struct PageTypeConfig {
    pub name: String,
    /// Field name to ordered candidate selectors
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<FieldSelector>>,
    #[serde(default)]
    pub links: Vec<LinkSelector>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    60_000
}

fn default_checkpoint_interval() -> u32 {
    10
}

fn default_min_fields() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_seed_page_type() -> String {
    "listing".to_string()
}
