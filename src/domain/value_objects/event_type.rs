use crate::error::{EventStoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Value Object: the name of an event (e.g. `order.placed`, `ProjectCompleted`).
///
/// The store does not impose a naming convention on producers — case,
/// namespacing, and separators are entirely up to the caller. The only
/// constraint is structural: a type must be a non-empty, reasonably sized
/// string with no control characters and no `__`, since `__` is reserved as
/// the version token field separator (see [`crate::version_token::VersionToken`]
/// and [`super::ObjectId`], which enforces the same rule for the same reason).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(String);

impl EventType {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        Self::validate(&value)?;
        Ok(Self(value))
    }

    /// Construct without validation. Only for loading from a source that has
    /// already validated the value (e.g. deserializing a stored event).
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
                "event type cannot be empty".to_string(),
            ));
        }
        if value.len() > 128 {
            return Err(EventStoreError::InvalidInput(format!(
                "event type cannot exceed 128 characters, got {}",
                value.len()
            )));
        }
        if value.chars().any(|c| c.is_control()) {
            return Err(EventStoreError::InvalidInput(
                "event type cannot contain control characters".to_string(),
            ));
        }
        if value.trim().is_empty() {
            return Err(EventStoreError::InvalidInput(
                "event type cannot be only whitespace".to_string(),
            ));
        }
        if value != value.trim() {
            return Err(EventStoreError::InvalidInput(
                "event type cannot have leading or trailing whitespace".to_string(),
            ));
        }
        if value.contains("__") {
            return Err(EventStoreError::InvalidInput(
                "event type cannot contain '__' (reserved as the version token separator)"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for EventType {
    type Error = EventStoreError;

    fn try_from(value: &str) -> Result<Self> {
        EventType::new(value)
    }
}

impl TryFrom<String> for EventType {
    type Error = EventStoreError;

    fn try_from(value: String) -> Result<Self> {
        EventType::new(value)
    }
}
