//! The `Event` entity: one immutable fact recorded in a stream.

use crate::domain::value_objects::EventType;
use crate::error::{EventStoreError, Result};
use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;

/// Who/when/correlation bookkeeping carried alongside an event, independent
/// of the event's own payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMetadata {
    pub actor: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
}

impl ActionMetadata {
    pub fn now(actor: Option<String>) -> Self {
        Self {
            actor,
            occurred_at: Utc::now(),
            correlation_id: None,
            causation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_causation(mut self, causation_id: impl Into<String>) -> Self {
        self.causation_id = Some(causation_id.into());
        self
    }
}

/// One event in a stream.
///
/// `event_version` is the event's position in its logical stream; it is
/// assigned by the stream engine at commit time, not by the producer.
/// Before a commit, a freshly-staged event carries version `0` as a
/// placeholder (see [`Event::stage`]); [`Event::with_version`] is used by the
/// engine to stamp the real value once the commit's base tip is known.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    event_type: EventType,
    event_version: u64,
    schema_version: u32,
    external_sequencer: Option<String>,
    payload: Value,
    action_metadata: Option<ActionMetadata>,
    metadata: HashMap<String, String>,
}

/// On the wire, `payload` is carried as a JSON-encoded string nested inside
/// the event envelope rather than as inline JSON, so a producer's payload
/// shape can never be confused with envelope fields and a consumer that only
/// understands the envelope can still forward the payload untouched. This
/// matches [`ActionMetadata`] and the rest of the envelope, which stay plain
/// camelCase JSON — only `payload` is double-encoded.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventWire {
    event_type: EventType,
    event_version: u64,
    schema_version: u32,
    external_sequencer: Option<String>,
    payload: String,
    action_metadata: Option<ActionMetadata>,
    metadata: HashMap<String, String>,
}

impl Serialize for Event {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let payload = serde_json::to_string(&self.payload).map_err(serde::ser::Error::custom)?;
        let mut state = serializer.serialize_struct("Event", 7)?;
        state.serialize_field("eventType", &self.event_type)?;
        state.serialize_field("eventVersion", &self.event_version)?;
        state.serialize_field("schemaVersion", &self.schema_version)?;
        state.serialize_field("externalSequencer", &self.external_sequencer)?;
        state.serialize_field("payload", &payload)?;
        state.serialize_field("actionMetadata", &self.action_metadata)?;
        state.serialize_field("metadata", &self.metadata)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = EventWire::deserialize(deserializer)?;
        let payload: Value = serde_json::from_str(&wire.payload).map_err(serde::de::Error::custom)?;
        Ok(Event {
            event_type: wire.event_type,
            event_version: wire.event_version,
            schema_version: wire.schema_version,
            external_sequencer: wire.external_sequencer,
            payload,
            action_metadata: wire.action_metadata,
            metadata: wire.metadata,
        })
    }
}

impl Event {
    /// Stage a new event for appending. `event_version` is assigned later by
    /// the stream engine; `schema_version` is the producer's current schema
    /// generation for this event type.
    pub fn stage(
        event_type: impl TryInto<EventType, Error = EventStoreError>,
        schema_version: u32,
        payload: Value,
    ) -> Result<Self> {
        if schema_version == 0 {
            return Err(EventStoreError::InvalidEvent(
                "schema_version must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            event_type: event_type.try_into()?,
            event_version: 0,
            schema_version,
            external_sequencer: None,
            payload,
            action_metadata: None,
            metadata: HashMap::new(),
        })
    }

    /// Reconstruct an event from already-validated, already-stamped parts
    /// (used when loading from a data store; bypasses producer-side checks).
    #[allow(clippy::too_many_arguments)]
    pub fn reconstruct(
        event_type: EventType,
        event_version: u64,
        schema_version: u32,
        external_sequencer: Option<String>,
        payload: Value,
        action_metadata: Option<ActionMetadata>,
        metadata: HashMap<String, String>,
    ) -> Self {
        Self {
            event_type,
            event_version,
            schema_version,
            external_sequencer,
            payload,
            action_metadata,
            metadata,
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.event_version = version;
        self
    }

    pub fn with_external_sequencer(mut self, sequencer: impl Into<String>) -> Self {
        self.external_sequencer = Some(sequencer.into());
        self
    }

    pub fn with_action_metadata(mut self, metadata: ActionMetadata) -> Self {
        self.action_metadata = Some(metadata);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Replace event type and schema version in place, used by upcasters to
    /// emit the equivalent event under a newer schema without discarding the
    /// position/passenger fields.
    pub fn upcasted(&self, event_type: EventType, schema_version: u32, payload: Value) -> Self {
        Self {
            event_type,
            event_version: self.event_version,
            schema_version,
            external_sequencer: self.external_sequencer.clone(),
            payload,
            action_metadata: self.action_metadata.clone(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn event_type_str(&self) -> &str {
        self.event_type.as_str()
    }

    pub fn event_version(&self) -> u64 {
        self.event_version
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn external_sequencer(&self) -> Option<&str> {
        self.external_sequencer.as_deref()
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn action_metadata(&self) -> Option<&ActionMetadata> {
        self.action_metadata.as_ref()
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn is_type(&self, event_type: &str) -> bool {
        self.event_type.as_str() == event_type
    }
}
