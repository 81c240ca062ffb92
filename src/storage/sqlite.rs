//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::extract::ExtractedRecord;
use crate::state::{FrontierItem, FrontierStatus};
use crate::storage::identity::IdentityParts;
use crate::storage::query::{RecordCursor, RecordFilter};
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{PersistedRecord, RunRecord, RunStatus, SubmitOutcome};
use crate::ParsonicError;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const RECORD_COLUMNS: &str = "id, identity_key, fields, source_url, page_type, extracted_at, \
                              first_seen, last_seen, version";

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(ParsonicError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, ParsonicError> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, ParsonicError> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl Storage for SqliteStorage {
    // ===== Run Management =====

    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64> {
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![
                db_time(&Utc::now()),
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
                params![run_id],
                run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY id DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    fn update_run_status(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let finished_at = (status != RunStatus::Running).then(|| db_time(&Utc::now()));
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), finished_at, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Records =====

    fn submit(&mut self, record: &ExtractedRecord) -> StorageResult<SubmitOutcome> {
        if !record.is_valid() {
            return Ok(SubmitOutcome::Rejected);
        }

        let incoming = IdentityParts::of(record);
        let now = Utc::now();
        let tx = self.conn.transaction()?;

        let outcome = match resolve_existing(&tx, &incoming)? {
            Some(existing) => {
                let version = merge_record(&tx, existing, record, now)?;
                SubmitOutcome::Updated { version }
            }
            None => {
                insert_record(&tx, record, &incoming, now)?;
                SubmitOutcome::Inserted
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn get_record(&self, identity_key: &str) -> StorageResult<Option<PersistedRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {} FROM records WHERE identity_key = ?1", RECORD_COLUMNS),
                params![identity_key],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn query_page(
        &self,
        filter: &RecordFilter,
        cursor: Option<&RecordCursor>,
        limit: usize,
    ) -> StorageResult<Vec<PersistedRecord>> {
        let sql = format!(
            "SELECT {} FROM records
             WHERE (?1 IS NULL OR last_seen >= ?1)
               AND (?2 IS NULL OR page_type = ?2)
               AND (?3 IS NULL OR last_seen < ?3 OR (last_seen = ?3 AND id < ?4))
             ORDER BY last_seen DESC, id DESC
             LIMIT ?5",
            RECORD_COLUMNS
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(
                params![
                    filter.changed_since.as_ref().map(db_time),
                    filter.page_type.as_deref(),
                    cursor.map(|c| db_time(&c.last_seen)),
                    cursor.map(|c| c.id),
                    limit as i64,
                ],
                record_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    // ===== Frontier Checkpoint =====

    fn save_checkpoint(&mut self, items: &[FrontierItem]) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM frontier", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO frontier (identity, url, depth, origin_domain, status, attempt_count,
                 discovered_from, page_type, not_before, position)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;

            for (position, item) in items.iter().enumerate() {
                stmt.execute(params![
                    item.identity,
                    item.url,
                    item.depth,
                    item.origin_domain,
                    item.status.to_db_string(),
                    item.attempt_count,
                    item.discovered_from,
                    item.page_type,
                    item.not_before.as_ref().map(db_time),
                    position as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_checkpoint(&self) -> StorageResult<Vec<FrontierItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT identity, url, depth, origin_domain, status, attempt_count, discovered_from,
             page_type, not_before FROM frontier ORDER BY position",
        )?;

        let items = stmt
            .query_map([], |row| {
                let status: String = row.get(4)?;
                Ok(FrontierItem {
                    identity: row.get(0)?,
                    url: row.get(1)?,
                    depth: row.get(2)?,
                    origin_domain: row.get(3)?,
                    status: FrontierStatus::from_db_string(&status).ok_or_else(|| {
                        conversion_error(4, format!("unknown frontier status '{}'", status))
                    })?,
                    attempt_count: row.get(5)?,
                    discovered_from: row.get(6)?,
                    page_type: row.get(7)?,
                    not_before: row
                        .get::<_, Option<String>>(8)?
                        .map(|s| parse_time(8, &s))
                        .transpose()?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(items)
    }

    fn clear_frontier(&mut self) -> StorageResult<()> {
        self.conn.execute("DELETE FROM frontier", [])?;
        Ok(())
    }

    // ===== Statistics =====

    fn count_records(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn count_records_by_page_type(&self) -> StorageResult<Vec<(String, u64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT page_type, COUNT(*) FROM records GROUP BY page_type ORDER BY page_type",
        )?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    fn count_frontier_by_status(&self) -> StorageResult<HashMap<FrontierStatus, u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM frontier GROUP BY status")?;

        let mut counts = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        for row in rows {
            let (status, count) = row?;
            let status = FrontierStatus::from_db_string(&status)
                .ok_or_else(|| StorageError::Corrupt(format!("frontier status '{}'", status)))?;
            counts.insert(status, count as u64);
        }

        Ok(counts)
    }
}

/// Finds the stored record an incoming record should merge into
///
/// 1. exact identity key
/// 2. same name sharing a phone or email
/// 3. same name where one side has no contact: a contactless incoming record
///    merges only when exactly one record has that name; an incoming record
///    with contact details fills the most recent contactless record
fn resolve_existing(
    tx: &Transaction<'_>,
    incoming: &IdentityParts,
) -> StorageResult<Option<PersistedRecord>> {
    let exact = tx
        .query_row(
            &format!("SELECT {} FROM records WHERE identity_key = ?1", RECORD_COLUMNS),
            params![incoming.identity_key],
            record_from_row,
        )
        .optional()?;
    if exact.is_some() || incoming.name_key.is_empty() {
        return Ok(exact);
    }

    let mut stmt = tx.prepare(&format!(
        "SELECT {} FROM records WHERE name_key = ?1 ORDER BY last_seen DESC, id DESC",
        RECORD_COLUMNS
    ))?;
    let mut candidates = stmt
        .query_map(params![incoming.name_key], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    if !incoming.has_contact() {
        return Ok(if candidates.len() == 1 {
            candidates.pop()
        } else {
            None
        });
    }

    let parts: Vec<IdentityParts> = candidates
        .iter()
        .map(|c| IdentityParts::of(&c.record))
        .collect();

    let position = parts
        .iter()
        .position(|p| incoming.shares_contact(&p.phone_key, &p.email_key))
        .or_else(|| parts.iter().position(|p| !p.has_contact()));

    Ok(position.map(|i| candidates.swap_remove(i)))
}

fn insert_record(
    tx: &Transaction<'_>,
    record: &ExtractedRecord,
    parts: &IdentityParts,
    now: DateTime<Utc>,
) -> StorageResult<()> {
    let fields = serde_json::to_string(&non_empty(&record.fields))?;
    tx.execute(
        "INSERT INTO records (identity_key, name_key, phone_key, email_key, fields, source_url,
         page_type, extracted_at, first_seen, last_seen, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, 1)",
        params![
            parts.identity_key,
            parts.name_key,
            parts.phone_key,
            parts.email_key,
            fields,
            record.source_url,
            record.page_type,
            db_time(&record.extracted_at),
            db_time(&now),
        ],
    )?;
    Ok(())
}

/// Merges `incoming` into `existing` and returns the new version
fn merge_record(
    tx: &Transaction<'_>,
    existing: PersistedRecord,
    incoming: &ExtractedRecord,
    now: DateTime<Utc>,
) -> StorageResult<u32> {
    let mut fields = existing.record.fields;
    for (name, value) in &incoming.fields {
        if !value.is_empty() {
            fields.insert(name.clone(), value.clone());
        }
    }

    let merged = ExtractedRecord {
        source_url: incoming.source_url.clone(),
        fields,
        extracted_at: incoming.extracted_at,
        page_type: incoming.page_type.clone(),
    };
    let parts = IdentityParts::of(&merged);

    // Keep the old key if the merged one already names a different record.
    let key_taken: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM records WHERE identity_key = ?1 AND id != ?2)",
        params![parts.identity_key, existing.id],
        |row| row.get(0),
    )?;
    let identity_key = if key_taken {
        existing.identity_key
    } else {
        parts.identity_key
    };

    let version = existing.version + 1;
    tx.execute(
        "UPDATE records SET identity_key = ?1, name_key = ?2, phone_key = ?3, email_key = ?4,
         fields = ?5, source_url = ?6, page_type = ?7, extracted_at = ?8, last_seen = ?9,
         version = ?10
         WHERE id = ?11",
        params![
            identity_key,
            parts.name_key,
            parts.phone_key,
            parts.email_key,
            serde_json::to_string(&merged.fields)?,
            merged.source_url,
            merged.page_type,
            db_time(&merged.extracted_at),
            db_time(&now),
            version,
            existing.id,
        ],
    )?;

    Ok(version)
}

fn non_empty(fields: &BTreeMap<String, String>) -> BTreeMap<&str, &str> {
    fields
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    let status: String = row.get(4)?;
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&status)
            .ok_or_else(|| conversion_error(4, format!("unknown run status '{}'", status)))?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<PersistedRecord> {
    let fields: String = row.get(2)?;
    let fields: BTreeMap<String, String> = serde_json::from_str(&fields)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;

    Ok(PersistedRecord {
        id: row.get(0)?,
        identity_key: row.get(1)?,
        record: ExtractedRecord {
            source_url: row.get(3)?,
            fields,
            extracted_at: parse_time(5, &row.get::<_, String>(5)?)?,
            page_type: row.get(4)?,
        },
        first_seen: parse_time(6, &row.get::<_, String>(6)?)?,
        last_seen: parse_time(7, &row.get::<_, String>(7)?)?,
        version: row.get(8)?,
    })
}

/// Fixed-width UTC timestamps so text order matches time order
fn db_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}
