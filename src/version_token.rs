//! Canonical version token: the single string identifier for one event
//! position within one object's stream.
//!
//! Format: `{object_name}__{object_id}__{stream_identifier}__{version20}`
//! where `version20` is the version zero-padded to 20 digits so that
//! lexicographic string ordering equals numeric ordering on the version,
//! regardless of which key-value backend stores the token.

use crate::error::{EventStoreError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

const SEPARATOR: &str = "__";
const VERSION_WIDTH: usize = 20;

/// A parsed, immutable version token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct VersionToken {
    object_name: String,
    object_id: String,
    stream_identifier: String,
    version: u64,
}

impl VersionToken {
    pub fn new(
        object_name: impl Into<String>,
        object_id: impl Into<String>,
        stream_identifier: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            object_name: object_name.into(),
            object_id: object_id.into(),
            stream_identifier: stream_identifier.into(),
            version,
        }
    }

    /// Parse a canonical token string. Exactly three `__` separators are
    /// required and the trailing field must be 20 decimal digits.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(SEPARATOR).collect();
        if parts.len() != 4 {
            return Err(EventStoreError::MalformedToken(format!(
                "expected 4 '__'-separated fields, got {} in '{s}'",
                parts.len()
            )));
        }
        let [object_name, object_id, stream_identifier, version_str] = [parts[0], parts[1], parts[2], parts[3]];

        if version_str.len() != VERSION_WIDTH || !version_str.chars().all(|c| c.is_ascii_digit()) {
            return Err(EventStoreError::MalformedToken(format!(
                "version field must be {VERSION_WIDTH} decimal digits, got '{version_str}' in '{s}'"
            )));
        }
        let version: u64 = version_str.parse().map_err(|_| {
            EventStoreError::MalformedToken(format!("version field is not a valid integer: '{version_str}'"))
        })?;

        if object_name.is_empty() || object_id.is_empty() || stream_identifier.is_empty() {
            return Err(EventStoreError::MalformedToken(format!(
                "object_name, object_id, and stream_identifier must all be non-empty in '{s}'"
            )));
        }

        Ok(Self {
            object_name: object_name.to_string(),
            object_id: object_id.to_string(),
            stream_identifier: stream_identifier.to_string(),
            version,
        })
    }

    /// Render the canonical token string.
    pub fn format(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{:0width$}",
            self.object_name,
            self.object_id,
            self.stream_identifier,
            self.version,
            width = VERSION_WIDTH
        )
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    pub fn stream_identifier(&self) -> &str {
        &self.stream_identifier
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether `other` addresses the same object and stream as `self`
    /// (a prerequisite for [`VersionToken::order`]).
    pub fn same_stream(&self, other: &VersionToken) -> bool {
        self.object_name == other.object_name
            && self.object_id == other.object_id
            && self.stream_identifier == other.stream_identifier
    }

    /// Compare two tokens by version, provided they address the same stream.
    pub fn order(&self, other: &VersionToken) -> Result<Ordering> {
        if !self.same_stream(other) {
            return Err(EventStoreError::StreamMismatch {
                a: self.format(),
                b: other.format(),
            });
        }
        Ok(self.version.cmp(&other.version))
    }

    /// A copy of this token pointing at the next version (used by readers
    /// following the tail of a stream).
    pub fn to_latest(&self, latest_version: u64) -> VersionToken {
        VersionToken {
            version: latest_version,
            ..self.clone()
        }
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

impl TryFrom<String> for VersionToken {
    type Error = EventStoreError;

    fn try_from(value: String) -> Result<Self> {
        VersionToken::parse(&value)
    }
}

impl From<VersionToken> for String {
    fn from(value: VersionToken) -> Self {
        value.format()
    }
}
