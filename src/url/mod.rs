//! URL handling module for Parsonic
//!
//! Frontier identity normalization, domain extraction, and the link scope
//! used to decide which discovered links are followed.

mod normalize;
mod scope;

pub use normalize::{normalize_url, url_identity};
pub use scope::{extract_domain, matches_wildcard, LinkScope};
