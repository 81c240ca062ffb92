//! Parsonic: a selector-driven business record crawler
//!
//! This crate crawls web pages, extracts business records (company name, phone,
//! email, address, links) with accumulated CSS selectors, asks a local language
//! model for new selectors when extraction comes up short, and persists
//! deduplicated records to SQLite.

pub mod ai;
pub mod config;
pub mod crawler;
pub mod extract;
pub mod output;
pub mod robots;
pub mod state;
pub mod storage;
pub mod thermal;
pub mod url;

use thiserror::Error;

/// Main error type for Parsonic operations
#[derive(Debug, Error)]
pub enum ParsonicError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Inference error: {0}")]
    Inference(#[from] ai::InferenceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
///
/// Every variant is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Parsonic operations
pub type Result<T> = std::result::Result<T, ParsonicError>;

// Re-export commonly used types
pub use config::Config;
pub use extract::{ExtractedRecord, SelectorSet, SelectorStore};
pub use state::FrontierStatus;
pub use storage::{PersistedRecord, SubmitOutcome};
pub use url::{extract_domain, normalize_url, url_identity};
