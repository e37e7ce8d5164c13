//! Layered configuration for the event store engine.
//!
//! Precedence, following the teacher's `Config::load` pattern: hard-coded
//! defaults, then a TOML file, then `EVENTSTORE_`-prefixed environment
//! variables, with eager validation at the end. This crate is a library with
//! no listening port or CORS policy — there is no `ServerConfig` here.

use crate::error::{EventStoreError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub default_data_store: String,
    pub default_document_store: Option<String>,
    pub default_snapshot_store: Option<String>,
    pub default_tag_store: Option<String>,
    pub auto_create_container: bool,
    pub enable_stream_chunks: bool,
    pub default_chunk_size: u64,
    pub default_document_container_name: String,

    pub snapshot_interval: u64,
    pub max_snapshots_per_stream: usize,

    pub upcast_max_chain_length: u32,

    pub saga: SagaSettings,
    pub resilience: ResilienceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaSettings {
    pub lock_lease_secs: u64,
    pub lock_heartbeat_secs: u64,
    pub lock_acquire_timeout_secs: u64,
    pub max_drain_retries: u32,
}

impl Default for SagaSettings {
    fn default() -> Self {
        Self {
            lock_lease_secs: 60,
            lock_heartbeat_secs: 20,
            lock_acquire_timeout_secs: 30,
            max_drain_retries: 5,
        }
    }
}

impl SagaSettings {
    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    pub fn lock_heartbeat(&self) -> Duration {
        Duration::from_secs(self.lock_heartbeat_secs)
    }

    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_acquire_timeout_secs)
    }
}

/// Exponential backoff with jitter for the resilience wrapper around a
/// `DataStore` backend, used to retry transient/external errors before
/// escalating to a partial-failure or concurrency outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceSettings {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_attempts: u32,
    pub jitter_fraction: f64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 50,
            multiplier: 2.0,
            max_attempts: 5,
            jitter_fraction: 0.2,
        }
    }
}

impl ResilienceSettings {
    /// The exponential backoff delay before retry `attempt` (0-indexed),
    /// with +/- `jitter_fraction` random jitter so a burst of callers backing
    /// off at the same time don't all retry in lockstep.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let jitter_span = base * self.jitter_fraction;
        let jitter = if jitter_span > 0.0 {
            rand::thread_rng().gen_range(-jitter_span..=jitter_span)
        } else {
            0.0
        };
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_data_store: "in_memory".to_string(),
            default_document_store: None,
            default_snapshot_store: None,
            default_tag_store: None,
            auto_create_container: true,
            enable_stream_chunks: true,
            default_chunk_size: 10_000,
            default_document_container_name: "objects".to_string(),
            snapshot_interval: 100,
            max_snapshots_per_stream: 5,
            upcast_max_chain_length: 64,
            saga: SagaSettings::default(),
            resilience: ResilienceSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Resolve the document store name, defaulting to `default_data_store`.
    pub fn document_store(&self) -> &str {
        self.default_document_store.as_deref().unwrap_or(&self.default_data_store)
    }

    /// Resolve the snapshot store name, defaulting to `default_data_store`.
    pub fn snapshot_store(&self) -> &str {
        self.default_snapshot_store.as_deref().unwrap_or(&self.default_data_store)
    }

    /// Resolve the tag store name, defaulting to `default_data_store`.
    pub fn tag_store(&self) -> &str {
        self.default_tag_store.as_deref().unwrap_or(&self.default_data_store)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| EventStoreError::Configuration(format!("failed to read config file: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| EventStoreError::Configuration(format!("invalid config format: {e}")))
    }

    /// Apply `EVENTSTORE_`-prefixed environment overrides on top of `self`.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("EVENTSTORE_DEFAULT_DATA_STORE") {
            self.default_data_store = v;
        }
        if let Ok(v) = std::env::var("EVENTSTORE_AUTO_CREATE_CONTAINER") {
            self.auto_create_container = v.parse().map_err(|_| {
                EventStoreError::Configuration("EVENTSTORE_AUTO_CREATE_CONTAINER must be a bool".to_string())
            })?;
        }
        if let Ok(v) = std::env::var("EVENTSTORE_ENABLE_STREAM_CHUNKS") {
            self.enable_stream_chunks = v.parse().map_err(|_| {
                EventStoreError::Configuration("EVENTSTORE_ENABLE_STREAM_CHUNKS must be a bool".to_string())
            })?;
        }
        if let Ok(v) = std::env::var("EVENTSTORE_DEFAULT_CHUNK_SIZE") {
            self.default_chunk_size = v
                .parse()
                .map_err(|_| EventStoreError::Configuration("EVENTSTORE_DEFAULT_CHUNK_SIZE must be a u64".to_string()))?;
        }
        if let Ok(v) = std::env::var("EVENTSTORE_SNAPSHOT_INTERVAL") {
            self.snapshot_interval = v
                .parse()
                .map_err(|_| EventStoreError::Configuration("EVENTSTORE_SNAPSHOT_INTERVAL must be a u64".to_string()))?;
        }
        Ok(())
    }

    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        settings.apply_env()?;
        Ok(settings)
    }

    /// Load with precedence defaults -> file (if present) -> env, then validate.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut settings = if let Some(path) = config_path {
            if path.exists() {
                tracing::info!(path = %path.display(), "loading engine settings from file");
                Self::from_file(path)?
            } else {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
        } else {
            Self::default()
        };

        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_data_store.trim().is_empty() {
            return Err(EventStoreError::Configuration(
                "default_data_store cannot be empty".to_string(),
            ));
        }
        if self.default_chunk_size == 0 {
            return Err(EventStoreError::Configuration(
                "default_chunk_size must be at least 1".to_string(),
            ));
        }
        if self.snapshot_interval == 0 {
            return Err(EventStoreError::Configuration(
                "snapshot_interval must be at least 1".to_string(),
            ));
        }
        if self.saga.lock_heartbeat_secs >= self.saga.lock_lease_secs {
            return Err(EventStoreError::Configuration(
                "saga.lock_heartbeat_secs must be less than saga.lock_lease_secs".to_string(),
            ));
        }
        if self.resilience.multiplier <= 1.0 {
            return Err(EventStoreError::Configuration(
                "resilience.multiplier must be greater than 1.0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| EventStoreError::Configuration(format!("failed to serialize config: {e}")))?;
        fs::write(path.as_ref(), toml)
            .map_err(|e| EventStoreError::Configuration(format!("failed to write config file: {e}")))?;
        Ok(())
    }

    pub fn example() -> String {
        toml::to_string_pretty(&EngineSettings::default())
            .unwrap_or_else(|_| String::from("# failed to generate example config"))
    }
}
