//! Storage module for persisting crawl results
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite database initialization and schema management
//! - Record validation, identity-key deduplication and merging
//! - Frontier checkpoints for resumption
//! - Run tracking

mod identity;
mod query;
mod schema;
mod sqlite;
mod traits;

pub use identity::{normalize_name, phone_digits, IdentityParts};
pub use query::{RecordCursor, RecordFilter, RecordQuery};
pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use crate::extract::ExtractedRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A deduplicated record as stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersistedRecord {
    pub id: i64,
    pub identity_key: String,
    #[serde(flatten)]
    pub record: ExtractedRecord,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub version: u32,
}

/// Result of submitting a record to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new record was created with version 1
    Inserted,
    /// An existing record was merged and now has `version`
    Updated { version: u32 },
    /// The record had no core field and was not persisted
    Rejected,
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// True for runs whose frontier may be resumed
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Running | Self::Interrupted)
    }
}
