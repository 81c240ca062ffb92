//! Configuration module for Parsonic
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use parsonic::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("parsonic.toml")).unwrap();
//! println!("Crawling with {} workers", config.crawler.concurrency);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    AiConfig, Config, CrawlerConfig, ExtractionConfig, FetchMode, FetcherConfig, OutputConfig,
    PageTypeConfig, RateLimitConfig, ThermalConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
