use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const COMPANY_NAME: &str = "company_name";
pub const PHONE: &str = "phone";
pub const EMAIL: &str = "email";
pub const ADDRESS: &str = "address";

/// Fields of which at least one must be present for a record to be valid
pub const CORE_FIELDS: [&str; 4] = [COMPANY_NAME, PHONE, EMAIL, ADDRESS];

/// A business record extracted from one page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub source_url: String,
    pub fields: BTreeMap<String, String>,
    pub extracted_at: DateTime<Utc>,
    pub page_type: String,
}

impl ExtractedRecord {
    pub fn new(source_url: impl Into<String>, page_type: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            fields: BTreeMap::new(),
            extracted_at: Utc::now(),
            page_type: page_type.into(),
        }
    }

    /// Builder-style setter, mostly for tests
    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    /// Value of a field, empty if absent
    pub fn get(&self, field: &str) -> &str {
        self.fields.get(field).map(String::as_str).unwrap_or("")
    }

    /// Number of non-empty fields
    pub fn field_count(&self) -> usize {
        self.fields.values().filter(|v| !v.is_empty()).count()
    }

    /// True if at least one of the core business fields is non-empty
    pub fn is_valid(&self) -> bool {
        CORE_FIELDS.iter().any(|field| !self.get(field).is_empty())
    }
}
