//! Lazy, keyset-paged record queries

use crate::storage::traits::{Storage, StorageResult};
use crate::storage::PersistedRecord;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

const DEFAULT_PAGE_SIZE: usize = 100;

/// Record selection criteria
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    /// Only records seen at or after this time
    pub changed_since: Option<DateTime<Utc>>,
    /// Only records last extracted from this page type
    pub page_type: Option<String>,
}

/// Position of the last record returned; paging continues strictly after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordCursor {
    pub last_seen: DateTime<Utc>,
    pub id: i64,
}

impl From<&PersistedRecord> for RecordCursor {
    fn from(record: &PersistedRecord) -> Self {
        Self {
            last_seen: record.last_seen,
            id: record.id,
        }
    }
}

/// Iterator over records ordered by `last_seen` desc, then id desc
///
/// Records are fetched a page at a time. The sequence can be restarted from
/// the beginning or resumed from any saved cursor, and is stable as long as
/// the store is not modified.
pub struct RecordQuery<'a, S: Storage> {
    storage: &'a S,
    filter: RecordFilter,
    cursor: Option<RecordCursor>,
    buffer: VecDeque<PersistedRecord>,
    page_size: usize,
    exhausted: bool,
}

impl<'a, S: Storage> RecordQuery<'a, S> {
    pub fn new(storage: &'a S, filter: RecordFilter) -> Self {
        Self {
            storage,
            filter,
            cursor: None,
            buffer: VecDeque::new(),
            page_size: DEFAULT_PAGE_SIZE,
            exhausted: false,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Continues after a previously returned record
    pub fn resume_from(mut self, cursor: RecordCursor) -> Self {
        self.cursor = Some(cursor);
        self.buffer.clear();
        self.exhausted = false;
        self
    }

    /// Position after the last record yielded so far
    pub fn cursor(&self) -> Option<&RecordCursor> {
        self.cursor.as_ref()
    }

    /// Starts over from the newest record
    pub fn restart(&mut self) {
        self.cursor = None;
        self.buffer.clear();
        self.exhausted = false;
    }

    fn fill(&mut self) -> StorageResult<()> {
        let page = self
            .storage
            .query_page(&self.filter, self.cursor.as_ref(), self.page_size)?;

        if page.len() < self.page_size {
            self.exhausted = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl<S: Storage> Iterator for RecordQuery<'_, S> {
    type Item = StorageResult<PersistedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }

        let record = self.buffer.pop_front()?;
        self.cursor = Some(RecordCursor::from(&record));
        Some(Ok(record))
    }
}
