use crate::error::{EventStoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value Object: ObjectId
///
/// Identifies one aggregate instance of a given object type (e.g. `order-123`,
/// `cart-9f2a`). Combined with an object name and a stream identifier it forms
/// the three addressable parts of a [`crate::version_token::VersionToken`].
///
/// Domain rules:
/// - Cannot be empty, cannot exceed 128 characters
/// - No control characters, no leading/trailing whitespace, not whitespace-only
/// - Cannot contain the double-underscore `__` sequence, since that sequence is
///   the version token field separator; an object id containing it would make
///   token parsing ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        Self::validate(&value)?;
        Ok(Self(value))
    }

    /// Construct without validation. Only for loading from a source that has
    /// already validated the value (e.g. deserializing a stored document).
    pub(crate) fn new_unchecked(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    fn validate(value: &str) -> Result<()> {
        if value.is_empty() {
            return Err(EventStoreError::InvalidInput(
                "object id cannot be empty".to_string(),
            ));
        }
        if value.len() > 128 {
            return Err(EventStoreError::InvalidInput(format!(
                "object id cannot exceed 128 characters, got {}",
                value.len()
            )));
        }
        if value.chars().any(|c| c.is_control()) {
            return Err(EventStoreError::InvalidInput(
                "object id cannot contain control characters".to_string(),
            ));
        }
        if value.trim().is_empty() {
            return Err(EventStoreError::InvalidInput(
                "object id cannot be only whitespace".to_string(),
            ));
        }
        if value != value.trim() {
            return Err(EventStoreError::InvalidInput(
                "object id cannot have leading or trailing whitespace".to_string(),
            ));
        }
        if value.contains("__") {
            return Err(EventStoreError::InvalidInput(
                "object id cannot contain '__' (reserved as the version token separator)"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for ObjectId {
    type Error = EventStoreError;

    fn try_from(value: &str) -> Result<Self> {
        ObjectId::new(value.to_string())
    }
}

impl TryFrom<String> for ObjectId {
    type Error = EventStoreError;

    fn try_from(value: String) -> Result<Self> {
        ObjectId::new(value)
    }
}
