//! Client configuration.

use crate::constants::{
    DEFAULT_CONTENT_TOPIC, DEFAULT_MAX_CONCURRENT_VERIFICATIONS, MAX_CLOCK_SKEW_MS,
    STALE_MESSAGE_AGE_MS,
};
use crate::error::{OpchanError, Result};
use crate::message::ValidatorLimits;
use crate::storage::RocksDbConfig;
use std::path::PathBuf;

/// Settings for an [`OpchanClient`](crate::client::OpchanClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Directory holding the client database.
    pub data_dir: PathBuf,
    /// Transport content topic for forum messages.
    pub content_topic: String,
    /// RocksDB tuning.
    pub rocksdb: RocksDbConfig,
    /// Maximum concurrent signature verifications in batch validation.
    pub max_concurrent_verifications: usize,
    /// Age after which a message timestamp draws a staleness warning.
    pub stale_message_age_ms: u64,
    /// How far in the future a timestamp may be before it draws a warning.
    pub max_clock_skew_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./opchan_data"),
            content_topic: DEFAULT_CONTENT_TOPIC.to_string(),
            rocksdb: RocksDbConfig::default(),
            max_concurrent_verifications: DEFAULT_MAX_CONCURRENT_VERIFICATIONS,
            stale_message_age_ms: STALE_MESSAGE_AGE_MS,
            max_clock_skew_ms: MAX_CLOCK_SKEW_MS,
        }
    }
}

impl ClientConfig {
    /// Default configuration storing data under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Sets the content topic.
    pub fn with_content_topic(mut self, content_topic: impl Into<String>) -> Self {
        self.content_topic = content_topic.into();
        self
    }

    /// Sets the RocksDB tuning.
    pub fn with_rocksdb(mut self, rocksdb: RocksDbConfig) -> Self {
        self.rocksdb = rocksdb;
        self
    }

    /// Sets the batch verification concurrency.
    pub fn with_max_concurrent_verifications(mut self, max: usize) -> Self {
        self.max_concurrent_verifications = max;
        self
    }

    /// Checks the configuration for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_verifications == 0 {
            return Err(OpchanError::config(
                "max_concurrent_verifications must be at least 1",
            ));
        }
        if self.content_topic.trim().is_empty() {
            return Err(OpchanError::config("content_topic must not be empty"));
        }
        Ok(())
    }

    /// Validator limits derived from this configuration.
    pub fn validator_limits(&self) -> ValidatorLimits {
        ValidatorLimits {
            max_concurrent_verifications: self.max_concurrent_verifications,
            stale_message_age_ms: self.stale_message_age_ms,
            max_clock_skew_ms: self.max_clock_skew_ms,
        }
    }
}
