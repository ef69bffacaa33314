use std::fmt::Display;

use thiserror::Error;

/// Longest UID an ISO 14443 tag reports (triple size, 10 bytes)
const MAX_UID_BYTES: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagIdError {
    #[error("tag id is empty")]
    Empty,

    #[error("tag id '{0}' is not hexadecimal")]
    NotHex(String),

    #[error("tag id '{0}' has an odd number of digits or is too long")]
    BadLength(String),
}

/// Identifier of an NFC tag.
///
/// Always uppercase hexadecimal with no separators, e.g. `04AABBCC`,
/// so two ids are equal exactly when their strings are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(String);

impl TagId {
    /// builds the id from raw UID bytes read by the sensor
    pub fn from_uid(uid: &[u8]) -> Self {
        Self(uid.iter().map(|b| format!("{b:02X}")).collect())
    }

    /// Parses an id typed by a user or printed by a reader.
    ///
    /// Accepts lowercase and the usual `:`, `-` and space separators.
    pub fn parse(text: &str) -> Result<Self, TagIdError> {
        let digits: String = text
            .trim()
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | ' '))
            .collect();

        if digits.is_empty() {
            return Err(TagIdError::Empty);
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TagIdError::NotHex(text.to_string()));
        }
        if digits.len() % 2 != 0 || digits.len() > MAX_UID_BYTES * 2 {
            return Err(TagIdError::BadLength(text.to_string()));
        }

        Ok(Self(digits.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TagId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
