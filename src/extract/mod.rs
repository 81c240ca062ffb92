//! Selector extraction engine
//!
//! Turns page content plus the current [`SelectorSet`] into an
//! [`ExtractedRecord`], pending reveal requests, and discovered links.

mod engine;
mod record;
mod sanitize;
mod selectors;

pub use engine::{
    DiscoveredLink, Extraction, ExtractionOptions, ExtractionWarning, RevealRequest,
    RevealTarget, SelectorEngine,
};
pub use record::{ExtractedRecord, ADDRESS, COMPANY_NAME, CORE_FIELDS, EMAIL, PHONE};
pub use sanitize::sanitize;
pub use selectors::{
    FieldSelector, LinkKind, LinkSelector, PageSelectors, SelectorSet, SelectorStore,
};
