//! Field value sanitization
//!
//! Every string read from a page passes through [`sanitize`] before it is
//! stored in a record. The function is applied until it reaches a fixed
//! point, so sanitizing an already sanitized value never changes it.

const ZERO_WIDTH: &[char] = &['\u{200b}', '\u{200c}', '\u{200d}', '\u{2060}', '\u{feff}'];

/// Cleans a raw text or attribute value
///
/// - removes zero-width characters
/// - collapses whitespace runs to a single space and trims
/// - strips `mailto:` and `tel:` prefixes, case-insensitively
/// - drops the `?subject=...` suffix of mailto values
/// - turns `javascript:` pseudo-links into the empty string
///
/// ```
/// use parsonic::extract::sanitize;
///
/// assert_eq!(sanitize("  MAILTO:info@acme.test?subject=Hi "), "info@acme.test");
/// assert_eq!(sanitize("tel:+1\u{200b} 555 0100"), "+1 555 0100");
/// ```
pub fn sanitize(raw: &str) -> String {
    let mut current = sanitize_pass(raw);
    loop {
        let next = sanitize_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn sanitize_pass(value: &str) -> String {
    let visible: String = value.chars().filter(|c| !ZERO_WIDTH.contains(c)).collect();
    let collapsed = visible.split_whitespace().collect::<Vec<_>>().join(" ");

    if has_prefix_ignore_case(&collapsed, "javascript:") {
        return String::new();
    }

    if has_prefix_ignore_case(&collapsed, "mailto:") {
        let address = &collapsed["mailto:".len()..];
        let address = address.split('?').next().unwrap_or_default();
        return address.trim().to_string();
    }

    if has_prefix_ignore_case(&collapsed, "tel:") {
        return collapsed["tel:".len()..].trim().to_string();
    }

    collapsed
}

fn has_prefix_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}
