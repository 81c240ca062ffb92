//! Selector sets and the shared selector store
//!
//! A [`SelectorSet`] maps page types to field candidates and link selectors.
//! The [`SelectorStore`] holds the current set behind an `Arc` so readers
//! take a cheap snapshot while the AI proposer swaps in merged versions.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A single candidate selector for a field
///
/// Reads the element text unless `attribute` names an attribute to read instead.
/// In configuration it is written either as a plain CSS string or as a table
/// `{ css = "...", attribute = "href" }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "FieldSelectorRepr")]
pub struct FieldSelector {
    pub css: String,
    pub attribute: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldSelectorRepr {
    Css(String),
    Full {
        css: String,
        #[serde(default)]
        attribute: Option<String>,
    },
}

impl From<FieldSelectorRepr> for FieldSelector {
    fn from(repr: FieldSelectorRepr) -> Self {
        match repr {
            FieldSelectorRepr::Css(css) => Self::text(css),
            FieldSelectorRepr::Full { css, attribute } => Self { css, attribute },
        }
    }
}

impl FieldSelector {
    /// Selector that reads element text
    pub fn text(css: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            attribute: None,
        }
    }

    /// Selector that reads an attribute of the matched element
    pub fn attr(css: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            attribute: Some(attribute.into()),
        }
    }
}

/// How a discovered link is treated by the crawler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LinkKind {
    /// Leads to a detail page for one business
    #[default]
    Detail,
    /// Leads to the next page of the same listing
    Pagination,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detail => "detail",
            Self::Pagination => "pagination",
        }
    }
}

/// A link selector tagged with its kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct LinkSelector {
    pub css: String,
    #[serde(default)]
    pub kind: LinkKind,
}

/// Selectors configured or learned for one page type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageSelectors {
    pub fields: BTreeMap<String, Vec<FieldSelector>>,
    pub links: Vec<LinkSelector>,
}

/// Versioned selector state keyed by page type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectorSet {
    version: u64,
    page_types: BTreeMap<String, PageSelectors>,
}

impl SelectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version, bumped on every mutation that changed the set
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn page_types(&self) -> impl Iterator<Item = &str> {
        self.page_types.keys().map(String::as_str)
    }

    pub fn page(&self, page_type: &str) -> Option<&PageSelectors> {
        self.page_types.get(page_type)
    }

    /// Every field name known to any page type
    pub fn field_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .page_types
            .values()
            .flat_map(|page| page.fields.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Ordered candidates for `field` on a page of `page_type`
    ///
    /// Candidates of the page's own type come first, then those of every other
    /// page type in name order. Duplicates keep their first position.
    pub fn candidates(&self, page_type: &str, field: &str) -> Vec<&FieldSelector> {
        let own = self
            .page_types
            .get(page_type)
            .and_then(|page| page.fields.get(field));
        let others = self
            .page_types
            .iter()
            .filter(|(name, _)| name.as_str() != page_type)
            .filter_map(|(_, page)| page.fields.get(field));

        let mut result: Vec<&FieldSelector> = Vec::new();
        for selector in own.into_iter().chain(others).flatten() {
            if !result.contains(&selector) {
                result.push(selector);
            }
        }
        result
    }

    /// Link selectors configured for `page_type`
    pub fn link_selectors(&self, page_type: &str) -> &[LinkSelector] {
        self.page_types
            .get(page_type)
            .map(|page| page.links.as_slice())
            .unwrap_or_default()
    }

    /// Appends a field candidate unless an identical one is already present
    ///
    /// Returns true if the set changed.
    pub fn add_field_selector(
        &mut self,
        page_type: &str,
        field: &str,
        selector: FieldSelector,
    ) -> bool {
        let candidates = self
            .page_types
            .entry(page_type.to_string())
            .or_default()
            .fields
            .entry(field.to_string())
            .or_default();

        if candidates.contains(&selector) {
            return false;
        }
        candidates.push(selector);
        self.version += 1;
        true
    }

    /// Appends a link selector unless an identical one is already present
    pub fn add_link_selector(&mut self, page_type: &str, selector: LinkSelector) -> bool {
        let links = &mut self
            .page_types
            .entry(page_type.to_string())
            .or_default()
            .links;

        if links.contains(&selector) {
            return false;
        }
        links.push(selector);
        self.version += 1;
        true
    }
}

/// Shared owner of the current [`SelectorSet`]
///
/// Readers clone an `Arc` of the current version. Writers build a new version
/// from a copy and swap the pointer, so readers are never blocked for longer
/// than the swap.
#[derive(Debug, Default)]
pub struct SelectorStore {
    current: RwLock<Arc<SelectorSet>>,
}

impl SelectorStore {
    pub fn new(set: SelectorSet) -> Self {
        Self {
            current: RwLock::new(Arc::new(set)),
        }
    }

    /// Returns the current selector set
    pub fn snapshot(&self) -> Arc<SelectorSet> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version()
    }

    /// Merges field candidates for `page_type` with append-if-absent semantics
    ///
    /// Returns how many selectors were actually added.
    pub fn merge<I>(&self, page_type: &str, additions: I) -> usize
    where
        I: IntoIterator<Item = (String, FieldSelector)>,
    {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = SelectorSet::clone(&guard);

        let added = additions
            .into_iter()
            .filter(|(field, selector)| next.add_field_selector(page_type, field, selector.clone()))
            .count();

        if added > 0 {
            *guard = Arc::new(next);
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_set() -> SelectorSet {
        let mut set = SelectorSet::new();
        set.add_field_selector("listing", "phone", FieldSelector::text(".card .phone"));
        set.add_field_selector("detail", "phone", FieldSelector::text("#phone"));
        set.add_field_selector("detail", "phone", FieldSelector::text(".card .phone"));
        set.add_field_selector("detail", "email", FieldSelector::attr("a.mail", "href"));
        set
    }

    #[test]
    fn test_own_page_type_candidates_come_first() {
        let set = sample_set();
        let css: Vec<&str> = set
            .candidates("listing", "phone")
            .iter()
            .map(|s| s.css.as_str())
            .collect();
        assert_eq!(css, vec![".card .phone", "#phone"]);

        let css: Vec<&str> = set
            .candidates("detail", "phone")
            .iter()
            .map(|s| s.css.as_str())
            .collect();
        assert_eq!(css, vec!["#phone", ".card .phone"]);
    }

    #[test]
    fn test_unknown_page_type_sees_all_candidates() {
        let set = sample_set();
        assert_eq!(set.candidates("other", "phone").len(), 2);
        assert_eq!(set.candidates("other", "fax").len(), 0);
    }

    #[test]
    fn test_readding_identical_selector_is_noop() {
        let mut set = sample_set();
        let version = set.version();
        assert!(!set.add_field_selector("listing", "phone", FieldSelector::text(".card .phone")));
        assert_eq!(set.version(), version);
    }

    #[test]
    fn test_field_names_are_unioned() {
        let set = sample_set();
        assert_eq!(set.field_names(), vec!["email", "phone"]);
    }

    #[test]
    fn test_store_merge_swaps_snapshot() {
        let store = SelectorStore::new(sample_set());
        let before = store.snapshot();

        let added = store.merge(
            "listing",
            vec![
                ("email".to_string(), FieldSelector::attr("a[href^=mailto]", "href")),
                ("phone".to_string(), FieldSelector::text(".card .phone")),
            ],
        );

        assert_eq!(added, 1);
        let after = store.snapshot();
        assert_eq!(after.version(), before.version() + 1);
        assert_eq!(before.candidates("listing", "email").len(), 1);
        assert_eq!(after.candidates("listing", "email").len(), 2);
    }

    #[test]
    fn test_store_merge_without_changes_keeps_version() {
        let store = SelectorStore::new(sample_set());
        let version = store.version();
        let added = store.merge(
            "detail",
            vec![("phone".to_string(), FieldSelector::text("#phone"))],
        );
        assert_eq!(added, 0);
        assert_eq!(store.version(), version);
    }

    #[test]
    fn test_field_selector_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            fields: Vec<FieldSelector>,
        }

        let parsed: Wrapper = toml::from_str(
            r#"fields = [".name", { css = "a.mail", attribute = "href" }]"#,
        )
        .unwrap();

        assert_eq!(parsed.fields[0], FieldSelector::text(".name"));
        assert_eq!(parsed.fields[1], FieldSelector::attr("a.mail", "href"));
    }
}
