use url::Url;

/// Extracts the lowercase host of a URL
///
/// Returns `None` for URLs without a host.
///
/// ```
/// use url::Url;
/// use parsonic::url::extract_domain;
///
/// let url = Url::parse("https://Shop.Example.COM/about").unwrap();
/// assert_eq!(extract_domain(&url), Some("shop.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Checks if a domain matches a pattern
///
/// `"example.com"` matches only itself; `"*.example.com"` matches the bare
/// domain and any depth of subdomain.
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            candidate == base
                || (candidate.len() > base.len()
                    && candidate.ends_with(base)
                    && candidate.as_bytes()[candidate.len() - base.len() - 1] == b'.')
        }
        None => candidate == pattern,
    }
}

/// Decides which discovered links stay inside the crawl
#[derive(Debug, Clone, Default)]
pub struct LinkScope {
    same_domain_only: bool,
    allowed_domains: Vec<String>,
}

impl LinkScope {
    pub fn new(same_domain_only: bool, allowed_domains: Vec<String>) -> Self {
        Self {
            same_domain_only,
            allowed_domains,
        }
    }

    /// Returns true if `link` may be enqueued from a page on `origin_domain`
    ///
    /// Links on the origin domain are always in scope. Off-domain links are in
    /// scope when they match an allowed pattern, or when the scope is open.
    pub fn permits(&self, origin_domain: &str, link: &Url) -> bool {
        let Some(domain) = extract_domain(link) else {
            return false;
        };

        if domain == origin_domain {
            return true;
        }

        if self
            .allowed_domains
            .iter()
            .any(|pattern| matches_wildcard(pattern, &domain))
        {
            return true;
        }

        !self.same_domain_only
    }
}
