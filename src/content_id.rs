//! Content identifiers
//!
//! Content IDs are opaque to the scanner but must look like a video ID before
//! anything touches the cache or the coordinator.

use crate::error::ScanError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Required length of a content ID.
pub const CONTENT_ID_LEN: usize = 11;

/// Validated, immutable content identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    /// Validate and wrap a raw identifier
    ///
    /// Accepts exactly 11 characters from `[A-Za-z0-9_-]`.
    pub fn parse(raw: &str) -> Result<Self, ScanError> {
        if is_valid(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ScanError::InvalidContentId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid(raw: &str) -> bool {
    raw.len() == CONTENT_ID_LEN
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentId {
    type Error = ScanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.0
    }
}
