//! Robots.txt handling
//!
//! Robots.txt is fetched once per origin through the crawl's page fetcher,
//! cached, and consulted before every page fetch.

mod cache;
mod rules;

pub use cache::RobotsCache;
pub use rules::RobotsRules;

/// Product token matched against robots.txt user-agent groups
pub const ROBOTS_AGENT: &str = "parsonic";
