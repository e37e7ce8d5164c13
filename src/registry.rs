//! Event registry: maps `(event name, schema version)` to a registration
//! entry. Built once via [`EventRegistryBuilder`], then frozen into an
//! immutable [`EventRegistry`] safe for concurrent reads from every stream
//! worker.

use crate::error::{EventStoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The wire encoding a registered event's payload is read and written in.
/// `Json` is the only encoding the store ships support for; the variant
/// exists so the registry's lookup surface doesn't need to change shape the
/// day a second codec (e.g. a binary schema-registry format) is added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    Json,
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Json
    }
}

/// One registered event type at one schema generation.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub event_name: String,
    pub schema_version: u32,
    pub runtime_type: String,
    pub codec: Codec,
}

/// Mutable builder; registrations fail once [`EventRegistryBuilder::freeze`]
/// has been called and the owning [`EventRegistry`] handed out.
#[derive(Debug, Default)]
pub struct EventRegistryBuilder {
    entries: HashMap<(String, u32), RegistryEntry>,
}

impl EventRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `runtime_type` under `event_name` at `schema_version`, using
    /// the default codec (`Json`). Use [`EventRegistryBuilder::register_with_codec`]
    /// to register under a non-default wire encoding.
    pub fn register(
        &mut self,
        runtime_type: impl Into<String>,
        event_name: impl Into<String>,
        schema_version: u32,
    ) -> Result<&mut Self> {
        self.register_with_codec(runtime_type, event_name, schema_version, Codec::Json)
    }

    pub fn register_with_codec(
        &mut self,
        runtime_type: impl Into<String>,
        event_name: impl Into<String>,
        schema_version: u32,
        codec: Codec,
    ) -> Result<&mut Self> {
        let event_name = event_name.into();
        let key = (event_name.clone(), schema_version);
        if self.entries.contains_key(&key) {
            return Err(EventStoreError::DuplicateEventType {
                name: event_name,
                version: schema_version,
            });
        }
        self.entries.insert(
            key,
            RegistryEntry {
                event_name,
                schema_version,
                runtime_type: runtime_type.into(),
                codec,
            },
        );
        Ok(self)
    }

    pub fn freeze(self) -> EventRegistry {
        EventRegistry {
            entries: self.entries,
        }
    }
}

/// Immutable, read-only registry. Registration after freezing always fails.
#[derive(Debug, Clone)]
pub struct EventRegistry {
    entries: HashMap<(String, u32), RegistryEntry>,
}

impl EventRegistry {
    /// Start building a new registry.
    pub fn builder() -> EventRegistryBuilder {
        EventRegistryBuilder::new()
    }

    pub fn by_name_and_version(&self, name: &str, version: u32) -> Option<&RegistryEntry> {
        self.entries.get(&(name.to_string(), version))
    }

    /// The highest registered schema version for `name`.
    pub fn by_name(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries
            .values()
            .filter(|entry| entry.event_name == name)
            .max_by_key(|entry| entry.schema_version)
    }

    pub fn by_type(&self, runtime_type: &str) -> Option<&RegistryEntry> {
        self.entries
            .values()
            .find(|entry| entry.runtime_type == runtime_type)
    }

    /// Registration always fails on a frozen registry; surfaces the error
    /// variant callers who hold only an `EventRegistry` (not the builder)
    /// would otherwise have no way to observe.
    pub fn register(&self, _event_name: &str, _schema_version: u32) -> Result<()> {
        Err(EventStoreError::RegistryFrozen)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup_by_name_and_version() {
        let mut builder = EventRegistry::builder();
        builder.register("OrderPlaced", "order.placed", 1).unwrap();
        let registry = builder.freeze();

        let entry = registry.by_name_and_version("order.placed", 1).unwrap();
        assert_eq!(entry.runtime_type, "OrderPlaced");
        assert_eq!(entry.codec, Codec::Json);
    }

    #[test]
    fn register_with_codec_is_recorded_on_the_entry() {
        let mut builder = EventRegistry::builder();
        builder
            .register_with_codec("OrderPlaced", "order.placed", 1, Codec::Json)
            .unwrap();
        let registry = builder.freeze();
        assert_eq!(registry.by_type("OrderPlaced").unwrap().codec, Codec::Json);
    }

    #[test]
    fn by_name_returns_highest_version() {
        let mut builder = EventRegistry::builder();
        builder.register("V1", "order.placed", 1).unwrap();
        builder.register("V2", "order.placed", 2).unwrap();
        builder.register("V3", "order.placed", 3).unwrap();
        let registry = builder.freeze();

        assert_eq!(registry.by_name("order.placed").unwrap().schema_version, 3);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut builder = EventRegistry::builder();
        builder.register("V1", "order.placed", 1).unwrap();
        let result = builder.register("V1Again", "order.placed", 1);
        assert!(matches!(result, Err(EventStoreError::DuplicateEventType { .. })));
    }

    #[test]
    fn frozen_registry_rejects_further_registration() {
        let registry = EventRegistry::builder().freeze();
        let result = registry.register("order.placed", 1);
        assert!(matches!(result, Err(EventStoreError::RegistryFrozen)));
    }
}
