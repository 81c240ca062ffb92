//! Output module for reporting crawl results
//!
//! This module handles:
//! - Store statistics (records, frontier, latest run)
//! - End-of-run summaries
//! - JSON Lines export of persisted records

mod export;
pub mod stats;

pub use export::export_json_lines;
pub use stats::{load_statistics, print_run_summary, print_statistics, StoreStatistics};
