//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::extract::ExtractedRecord;
use crate::state::{FrontierItem, FrontierStatus};
use crate::storage::query::{RecordCursor, RecordFilter, RecordQuery};
use crate::storage::{PersistedRecord, RunRecord, RunStatus, SubmitOutcome};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Every mutating operation runs in a single transaction.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new crawl run in the Running state
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Updates the status of a run, stamping the finish time for final states
    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Records =====

    /// Validates, deduplicates and persists an extracted record
    ///
    /// Invalid records are rejected without touching the store. A record that
    /// resolves to an existing identity is merged field by field: non-empty
    /// incoming values overwrite, empty values never do.
    fn submit(&mut self, record: &ExtractedRecord) -> StorageResult<SubmitOutcome>;

    /// Gets a record by identity key
    fn get_record(&self, identity_key: &str) -> StorageResult<Option<PersistedRecord>>;

    /// Fetches one page of records after `cursor`, newest first
    fn query_page(
        &self,
        filter: &RecordFilter,
        cursor: Option<&RecordCursor>,
        limit: usize,
    ) -> StorageResult<Vec<PersistedRecord>>;

    /// Lazily iterates every record matching `filter`
    fn query(&self, filter: RecordFilter) -> RecordQuery<'_, Self>
    where
        Self: Sized,
    {
        RecordQuery::new(self, filter)
    }

    // ===== Frontier Checkpoint =====

    /// Atomically replaces the stored frontier snapshot
    fn save_checkpoint(&mut self, items: &[FrontierItem]) -> StorageResult<()>;

    /// Loads the stored frontier snapshot in its original order
    fn load_checkpoint(&self) -> StorageResult<Vec<FrontierItem>>;

    /// Removes the stored frontier snapshot
    fn clear_frontier(&mut self) -> StorageResult<()>;

    // ===== Statistics =====

    /// Total number of persisted records
    fn count_records(&self) -> StorageResult<u64>;

    /// Record count per page type
    fn count_records_by_page_type(&self) -> StorageResult<Vec<(String, u64)>>;

    /// Checkpointed frontier items per status
    fn count_frontier_by_status(&self) -> StorageResult<HashMap<FrontierStatus, u64>>;
}
