//! Crawler module for the crawl pipeline
//!
//! This module contains the core crawling logic, including:
//! - The page fetcher boundary and its HTTP implementation
//! - The deduplicating frontier with retry scheduling
//! - Shared rate limiting
//! - Overall crawl coordination, checkpointing and resume

mod coordinator;
mod fetcher;
mod frontier;
mod rate_limiter;

pub use coordinator::{CancelSignal, Coordinator, RunSummary, StartMode, DETAIL_PAGE_TYPE};
pub use fetcher::{classify_status, FetchError, FetchedPage, HttpFetcher, PageFetcher};
pub use frontier::{Frontier, RetryPolicy};
pub use rate_limiter::RateLimiter;

use crate::ai::{FieldProposer, OllamaClient};
use crate::config::Config;
use crate::extract::SelectorStore;
use crate::storage::SqliteStorage;
use crate::thermal::{SystemThermalSource, ThermalGate};
use crate::ParsonicError;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Runs a complete crawl with the stock components
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Open the result store
/// 2. Build the HTTP fetcher
/// 3. Start the thermal poller and AI proposer when AI is enabled
/// 4. Resume or start a run and drain the frontier
///
/// # Arguments
///
/// * `config` - Validated configuration
/// * `config_hash` - Hash of the configuration file, stored with the run
/// * `mode` - Whether to resume earlier state
/// * `cancel` - Signal that stops the crawl after in-flight items
pub async fn crawl(
    config: &Config,
    config_hash: &str,
    mode: StartMode,
    cancel: CancelSignal,
) -> Result<RunSummary, ParsonicError> {
    let storage = SqliteStorage::new(Path::new(&config.output.database_path))?;
    let fetcher = HttpFetcher::from_config(&config.fetcher, config.rate_limit.stealth)?;
    let selectors = Arc::new(SelectorStore::new(config.selector_set()));

    let mut coordinator = Coordinator::new(
        config,
        storage,
        Arc::new(fetcher),
        Arc::clone(&selectors),
    )
    .with_config_hash(config_hash)
    .with_cancel_signal(cancel);

    let mut poller = None;
    if config.ai.enabled {
        let gate = Arc::new(ThermalGate::new(config.thermal.clone()));
        poller = gate.spawn_poller(Arc::new(SystemThermalSource::new()));

        let client = OllamaClient::new(&config.ai)?;
        info!("AI proposer enabled with model {}", config.ai.model);
        let proposer = FieldProposer::new(Arc::new(client), gate, selectors, config.ai.clone());
        coordinator = coordinator.with_proposer(Arc::new(proposer));
    }

    let summary = coordinator.run(mode).await;

    if let Some(handle) = poller {
        handle.abort();
    }

    summary
}
