//! Record identity keys
//!
//! A record's identity is derived from its normalized company name plus a
//! contact key (phone digits, or the lowercase email when no phone is known).
//! Records without a name fall back to contact, then address, then source URL.

use crate::extract::{ExtractedRecord, ADDRESS, COMPANY_NAME, EMAIL, PHONE};
use sha2::{Digest, Sha256};

/// Normalized parts a record is matched on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityParts {
    pub name_key: String,
    pub phone_key: String,
    pub email_key: String,
    pub identity_key: String,
}

impl IdentityParts {
    pub fn of(record: &ExtractedRecord) -> Self {
        let name_key = normalize_name(record.get(COMPANY_NAME));
        let phone_key = phone_digits(record.get(PHONE));
        let email_key = record.get(EMAIL).trim().to_lowercase();

        let contact = if phone_key.is_empty() {
            email_key.as_str()
        } else {
            phone_key.as_str()
        };

        let basis = if !name_key.is_empty() {
            format!("name:{}|{}", name_key, contact)
        } else if !contact.is_empty() {
            format!("contact:{}", contact)
        } else {
            let address = normalize_name(record.get(ADDRESS));
            if address.is_empty() {
                format!("url:{}", record.source_url)
            } else {
                format!("address:{}", address)
            }
        };

        Self {
            identity_key: hex::encode(Sha256::digest(basis.as_bytes())),
            name_key,
            phone_key,
            email_key,
        }
    }

    pub fn has_contact(&self) -> bool {
        !self.phone_key.is_empty() || !self.email_key.is_empty()
    }

    /// True if both sides share a non-empty phone or email key
    pub fn shares_contact(&self, phone_key: &str, email_key: &str) -> bool {
        (!self.phone_key.is_empty() && self.phone_key == phone_key)
            || (!self.email_key.is_empty() && self.email_key == email_key)
    }
}

/// Lowercases, keeps letters and digits, and collapses everything else to single spaces
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Digits of a phone number, with a leading `+` kept
pub fn phone_digits(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return digits;
    }
    if phone.trim_start().starts_with('+') {
        format!("+{}", digits)
    } else {
        digits
    }
}
