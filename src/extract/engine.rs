//! Selector-driven field and link extraction
//!
//! Extraction is synchronous and works on owned HTML text. The parsed document
//! never outlives a call, so callers can freely hold the results across await
//! points.

use crate::extract::record::ExtractedRecord;
use crate::extract::sanitize::sanitize;
use crate::extract::selectors::{FieldSelector, LinkKind, SelectorSet};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use url::Url;

/// Attributes consulted, in order, when reading a link target
const LINK_ATTRIBUTES: [&str; 3] = ["href", "data-href", "data-url"];

/// Non-fatal problems met while extracting a page
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionWarning {
    #[error("invalid selector '{css}' for {target}: {message}")]
    InvalidSelector {
        target: String,
        css: String,
        message: String,
    },
}

/// Location of a reveal control on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealTarget {
    pub field: String,
    pub css: String,
}

/// A field whose value sits behind a reveal control
///
/// The record already holds the control's own value (if any); after a
/// successful reveal the field is read again with `selector`.
#[derive(Debug, Clone, PartialEq)]
pub struct RevealRequest {
    pub field: String,
    pub selector: FieldSelector,
}

impl RevealRequest {
    pub fn target(&self) -> RevealTarget {
        RevealTarget {
            field: self.field.clone(),
            css: self.selector.css.clone(),
        }
    }
}

/// An absolute link found by a link selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredLink {
    pub url: Url,
    pub kind: LinkKind,
}

/// Everything extracted from one page
#[derive(Debug, Clone)]
pub struct Extraction {
    pub record: ExtractedRecord,
    pub warnings: Vec<ExtractionWarning>,
    pub reveals: Vec<RevealRequest>,
    pub links: Vec<DiscoveredLink>,
}

/// How reveal controls are recognized
#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    /// Attribute marking an element as a reveal control
    pub reveal_attribute: String,
    /// Class marking an element as a reveal control
    pub reveal_class: String,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            reveal_attribute: "data-reveal".to_string(),
            reveal_class: "reveal".to_string(),
        }
    }
}

/// Applies a [`SelectorSet`] to page content
#[derive(Debug, Clone, Default)]
pub struct SelectorEngine {
    options: ExtractionOptions,
}

impl SelectorEngine {
    pub fn new(options: ExtractionOptions) -> Self {
        Self { options }
    }

    /// Extracts fields and links from a page
    ///
    /// For each field known to the selector set, candidates are tried in order
    /// and the first whose matched element yields a non-empty value wins. A
    /// matched reveal control also ends the search and queues a reveal request.
    /// Fields with no match are absent from the record.
    ///
    /// # Arguments
    ///
    /// * `html` - Page content
    /// * `page_url` - URL the content was served from, used to resolve links
    /// * `selectors` - Selector snapshot to apply
    /// * `page_type` - Page type label of the page
    pub fn extract(
        &self,
        html: &str,
        page_url: &Url,
        selectors: &SelectorSet,
        page_type: &str,
    ) -> Extraction {
        let document = Html::parse_document(html);
        let mut record = ExtractedRecord::new(page_url.as_str(), page_type);
        let mut warnings = Vec::new();
        let mut reveals = Vec::new();

        for field in selectors.field_names() {
            for candidate in selectors.candidates(page_type, field) {
                let selector = match parse_selector(&candidate.css, field) {
                    Ok(selector) => selector,
                    Err(warning) => {
                        warnings.push(warning);
                        continue;
                    }
                };

                let Some(element) = document.select(&selector).next() else {
                    continue;
                };

                let value = read_value(&element, candidate);

                if self.is_reveal_control(&element) {
                    if !value.is_empty() {
                        record.fields.insert(field.to_string(), value);
                    }
                    reveals.push(RevealRequest {
                        field: field.to_string(),
                        selector: candidate.clone(),
                    });
                    break;
                }

                if !value.is_empty() {
                    record.fields.insert(field.to_string(), value);
                    break;
                }
            }
        }

        let base = document_base(&document, page_url);
        let mut links: Vec<DiscoveredLink> = Vec::new();

        for link_selector in selectors.link_selectors(page_type) {
            let target = format!("{} links", link_selector.kind.as_str());
            let selector = match parse_selector(&link_selector.css, &target) {
                Ok(selector) => selector,
                Err(warning) => {
                    warnings.push(warning);
                    continue;
                }
            };

            for element in document.select(&selector) {
                let Some(url) = link_target(&element).and_then(|href| resolve_link(href, &base))
                else {
                    continue;
                };

                if !links.iter().any(|known| known.url == url) {
                    links.push(DiscoveredLink {
                        url,
                        kind: link_selector.kind,
                    });
                }
            }
        }

        Extraction {
            record,
            warnings,
            reveals,
            links,
        }
    }

    /// Reads a single field from page content with one selector
    ///
    /// Returns `None` when the selector does not parse, does not match, or the
    /// value is empty after sanitization.
    pub fn read_field(&self, html: &str, selector: &FieldSelector) -> Option<String> {
        let parsed = Selector::parse(&selector.css).ok()?;
        let document = Html::parse_document(html);
        let value = document
            .select(&parsed)
            .next()
            .map(|element| read_value(&element, selector))?;
        (!value.is_empty()).then_some(value)
    }

    fn is_reveal_control(&self, element: &ElementRef<'_>) -> bool {
        let node = element.value();
        node.attr(&self.options.reveal_attribute).is_some()
            || node.classes().any(|class| class == self.options.reveal_class)
    }
}

fn parse_selector(css: &str, target: &str) -> Result<Selector, ExtractionWarning> {
    Selector::parse(css).map_err(|e| ExtractionWarning::InvalidSelector {
        target: target.to_string(),
        css: css.to_string(),
        message: e.to_string(),
    })
}

fn read_value(element: &ElementRef<'_>, selector: &FieldSelector) -> String {
    match &selector.attribute {
        Some(attribute) => element
            .value()
            .attr(attribute)
            .map(sanitize)
            .unwrap_or_default(),
        None => sanitize(&element.text().collect::<String>()),
    }
}

fn link_target<'a>(element: &ElementRef<'a>) -> Option<&'a str> {
    LINK_ATTRIBUTES
        .iter()
        .filter_map(|attribute| element.value().attr(attribute))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

/// Honors a `<base href>` element when present
fn document_base(document: &Html, page_url: &Url) -> Url {
    Selector::parse("base[href]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|element| element.value().attr("href"))
                .and_then(|href| page_url.join(href.trim()).ok())
        })
        .unwrap_or_else(|| page_url.clone())
}

/// Resolves a link target to an absolute http(s) URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only links
/// - Invalid URLs or non-HTTP(S) URLs after resolution
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let lowered = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lowered.starts_with(scheme))
    {
        return None;
    }

    if href.starts_with('#') {
        return None;
    }

    let mut absolute = base_url.join(href).ok()?;
    if absolute.scheme() != "http" && absolute.scheme() != "https" {
        return None;
    }
    absolute.set_fragment(None);
    Some(absolute)
}
