//! Statistics from the result store
//!
//! This module provides functionality for extracting and displaying
//! store, frontier and run statistics.

use crate::crawler::RunSummary;
use crate::state::FrontierStatus;
use crate::storage::{RunRecord, Storage};
use crate::ParsonicError;
use std::collections::HashMap;

/// Store statistics summary
#[derive(Debug, Clone)]
pub struct StoreStatistics {
    /// Total number of deduplicated records
    pub total_records: u64,

    /// Record count per page type, largest first
    pub records_by_page_type: Vec<(String, u64)>,

    /// Checkpointed frontier items per status
    pub frontier_by_status: HashMap<FrontierStatus, u64>,

    /// The most recent run, if any
    pub latest_run: Option<RunRecord>,
}

impl StoreStatistics {
    /// Total number of checkpointed frontier items
    pub fn frontier_total(&self) -> u64 {
        self.frontier_by_status.values().sum()
    }

    /// Checkpointed items that can still run
    pub fn frontier_outstanding(&self) -> u64 {
        self.frontier_by_status
            .iter()
            .filter(|(status, _)| !status.is_terminal())
            .map(|(_, count)| count)
            .sum()
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(StoreStatistics)` - Successfully loaded statistics
/// * `Err(ParsonicError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<StoreStatistics, ParsonicError> {
    let total_records = storage.count_records()?;

    let mut records_by_page_type = storage.count_records_by_page_type()?;
    records_by_page_type.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let frontier_by_status = storage.count_frontier_by_status()?;
    let latest_run = storage.get_latest_run()?;

    Ok(StoreStatistics {
        total_records,
        records_by_page_type,
        frontier_by_status,
        latest_run,
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &StoreStatistics) {
    println!("=== Parsonic Statistics ===\n");

    if let Some(run) = &stats.latest_run {
        println!("Latest Run:");
        println!("  Id: {}", run.id);
        println!("  Status: {}", run.status.to_db_string());
        println!("  Started: {}", run.started_at);
        if let Some(finished) = &run.finished_at {
            println!("  Finished: {}", finished);
        }
        println!();
    }

    println!("Records: {}", stats.total_records);
    for (page_type, count) in &stats.records_by_page_type {
        let percentage = if stats.total_records > 0 {
            (*count as f64 / stats.total_records as f64) * 100.0
        } else {
            0.0
        };
        println!("  {}: {} ({:.1}%)", page_type, count, percentage);
    }
    println!();

    println!("Frontier ({} URLs):", stats.frontier_total());
    for status in FrontierStatus::all() {
        if let Some(count) = stats.frontier_by_status.get(&status) {
            println!("  {}: {}", status, count);
        }
    }

    if stats.frontier_outstanding() > 0 {
        println!(
            "\n{} URLs still outstanding; run again without --fresh to resume",
            stats.frontier_outstanding()
        );
    }
}

/// Prints the summary of a finished run
pub fn print_run_summary(summary: &RunSummary) {
    let heading = if summary.cancelled {
        "Interrupted"
    } else {
        "Completed"
    };
    println!("=== Run {} {} ===\n", summary.run_id, heading);

    println!("Pages:");
    println!("  Processed: {}", summary.processed);
    println!("  Succeeded: {}", summary.succeeded);
    println!("  Failed: {}", summary.failed);
    println!("  Retried: {}", summary.retried);
    println!();

    println!("Records:");
    println!("  Inserted: {}", summary.inserted);
    println!("  Updated: {}", summary.updated);
    println!("  Rejected: {}", summary.rejected);
    println!();

    println!("AI Proposals:");
    println!("  Calls made: {}", summary.ai.calls);
    println!("  Gated: {}", summary.ai.gated);
    println!("  Failed: {}", summary.ai.failed);
    println!();

    let secs = summary.elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        summary.processed as f64 / secs
    } else {
        0.0
    };
    println!("Elapsed: {:.1}s ({:.2} pages/sec)", secs, rate);
}
