use crate::config::types::{
    AiConfig, Config, CrawlerConfig, FetcherConfig, OutputConfig, PageTypeConfig, RateLimitConfig,
    ThermalConfig,
};
use crate::ConfigError;
use scraper::Selector;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_seeds(&config.seeds)?;
    validate_crawler_config(&config.crawler)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_thermal_config(&config.thermal)?;
    validate_ai_config(&config.ai)?;
    validate_output_config(&config.output)?;
    validate_page_types(&config.page_types)?;
    Ok(())
}

fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    if seeds.is_empty() {
        return Err(ConfigError::Validation(
            "at least one seed URL is required".to_string(),
        ));
    }

    for seed in seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "Seed URL '{}' must use http or https",
                seed
            )));
        }
    }

    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 100, got {}",
            config.concurrency
        )));
    }

    if config.max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "max_attempts must be >= 1, got {}",
            config.max_attempts
        )));
    }

    if config.base_retry_delay_ms > config.max_retry_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base_retry_delay_ms ({}) must not exceed max_retry_delay_ms ({})",
            config.base_retry_delay_ms, config.max_retry_delay_ms
        )));
    }

    if config.checkpoint_interval < 1 {
        return Err(ConfigError::Validation(
            "checkpoint_interval must be >= 1".to_string(),
        ));
    }

    if config.seed_page_type.trim().is_empty() {
        return Err(ConfigError::Validation(
            "seed_page_type cannot be empty".to_string(),
        ));
    }

    for pattern in &config.allowed_domains {
        validate_domain_pattern(pattern)?;
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if !(config.requests_per_second > 0.0) || !config.requests_per_second.is_finite() {
        return Err(ConfigError::Validation(format!(
            "requests_per_second must be a positive number, got {}",
            config.requests_per_second
        )));
    }

    if config.burst < 1 {
        return Err(ConfigError::Validation(
            "burst must be >= 1".to_string(),
        ));
    }

    if config.jitter_min_ms > config.jitter_max_ms {
        return Err(ConfigError::Validation(format!(
            "jitter_min_ms ({}) must not exceed jitter_max_ms ({})",
            config.jitter_min_ms, config.jitter_max_ms
        )));
    }

    if config.adaptive && config.fast_streak < 1 {
        return Err(ConfigError::Validation(
            "fast_streak must be >= 1 when adaptive pacing is on".to_string(),
        ));
    }

    Ok(())
}

fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    for proxy in &config.proxies {
        let url = Url::parse(proxy)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid proxy '{}': {}", proxy, e)))?;

        if !matches!(url.scheme(), "http" | "https" | "socks5" | "socks5h") {
            return Err(ConfigError::InvalidUrl(format!(
                "Proxy '{}' must use http, https or socks5",
                proxy
            )));
        }
    }

    Ok(())
}

fn validate_thermal_config(config: &ThermalConfig) -> Result<(), ConfigError> {
    for (name, value) in [
        ("cpu_threshold", config.cpu_threshold),
        ("gpu_threshold", config.gpu_threshold),
        ("hysteresis_margin", config.hysteresis_margin),
    ] {
        if !(value > 0.0) {
            return Err(ConfigError::Validation(format!(
                "{} must be positive, got {}",
                name, value
            )));
        }
    }

    if config.poll_interval_secs < 1 {
        return Err(ConfigError::Validation(
            "poll_interval_secs must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_ai_config(config: &AiConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&config.min_confidence) {
        return Err(ConfigError::Validation(format!(
            "min_confidence must be within [0, 1], got {}",
            config.min_confidence
        )));
    }

    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure_threshold must be >= 1".to_string(),
        ));
    }

    if config.enabled {
        Url::parse(&config.host)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid ai host '{}': {}", config.host, e)))?;

        if config.model.trim().is_empty() {
            return Err(ConfigError::Validation("ai model cannot be empty".to_string()));
        }
    }

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Every page type needs a name and every selector must parse
fn validate_page_types(page_types: &[PageTypeConfig]) -> Result<(), ConfigError> {
    for page_type in page_types {
        if page_type.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "page type name cannot be empty".to_string(),
            ));
        }

        let field_selectors = page_type.fields.values().flatten().map(|s| s.css.as_str());
        let link_selectors = page_type.links.iter().map(|l| l.css.as_str());

        for css in field_selectors.chain(link_selectors) {
            validate_selector(css)?;
        }
    }

    Ok(())
}

fn validate_selector(css: &str) -> Result<(), ConfigError> {
    Selector::parse(css)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidSelector {
            selector: css.to_string(),
            message: e.to_string(),
        })
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
        || domain.contains("..")
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' is not a well-formed host name",
            domain
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{
        ExtractionConfig, FetcherConfig,
    };
    use crate::extract::FieldSelector;
    use std::collections::BTreeMap;

    fn create_test_config() -> Config {
        let mut fields = BTreeMap::new();
        fields.insert(
            "company_name".to_string(),
            vec![FieldSelector::text(".biz .name")],
        );

        Config {
            seeds: vec!["https://dir.example.com/".to_string()],
            crawler: CrawlerConfig {
                max_depth: 2,
                concurrency: 4,
                max_attempts: 3,
                base_retry_delay_ms: 500,
                max_retry_delay_ms: 10_000,
                checkpoint_interval: 10,
                min_fields: 2,
                same_domain_only: true,
                allowed_domains: vec!["*.example.org".to_string()],
                respect_robots_txt: true,
                seed_page_type: "listing".to_string(),
            },
            rate_limit: RateLimitConfig::default(),
            fetcher: FetcherConfig::default(),
            extraction: ExtractionConfig::default(),
            thermal: ThermalConfig::default(),
            ai: AiConfig::default(),
            output: OutputConfig {
                database_path: "./test.db".to_string(),
            },
            page_types: vec![PageTypeConfig {
                name: "listing".to_string(),
                fields,
                links: vec![],
            }],
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&create_test_config()).is_ok());
    }

    #[test]
    fn test_proxy_urls_are_checked() {
        let mut config = create_test_config();
        config.fetcher.proxies = vec!["http://10.0.0.1:3128".to_string()];
        assert!(validate(&config).is_ok());

        config.fetcher.proxies.push("not a proxy".to_string());
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));

        config.fetcher.proxies = vec!["ftp://10.0.0.1:21".to_string()];
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_concurrency_out_of_range() {
        let mut config = create_test_config();
        config.crawler.concurrency = 0;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        config.crawler.concurrency = 101;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_zero_rate_rejected() {
        let mut config = create_test_config();
        config.rate_limit.requests_per_second = 0.0;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));

        config.rate_limit.requests_per_second = f64::NAN;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_retry_delays_must_be_ordered() {
        let mut config = create_test_config();
        config.crawler.base_retry_delay_ms = 20_000;
        assert!(matches!(validate(&config), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = create_test_config();
        config.crawler.max_attempts = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let mut config = create_test_config();
        config.page_types[0]
            .fields
            .insert("phone".to_string(), vec![FieldSelector::text("div[[")]);

        match validate(&config) {
            Err(ConfigError::InvalidSelector { selector, .. }) => assert_eq!(selector, "div[["),
            other => panic!("expected InvalidSelector, got {:?}", other),
        }
    }

    #[test]
    fn test_non_http_seed_rejected() {
        let mut config = create_test_config();
        config.seeds = vec!["ftp://files.example.com/".to_string()];
        assert!(matches!(validate(&config), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_no_seeds_rejected() {
        let mut config = create_test_config();
        config.seeds.clear();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_min_confidence_range() {
        let mut config = create_test_config();
        config.ai.min_confidence = 1.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_allowed_domain_pattern() {
        let mut config = create_test_config();
        config.crawler.allowed_domains = vec!["bad domain.com".to_string()];
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidPattern(_))
        ));

        config.crawler.allowed_domains = vec!["*.".to_string()];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let mut config = create_test_config();
        config.thermal.hysteresis_margin = 0.0;
        assert!(validate(&config).is_err());
    }
}
