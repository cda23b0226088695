// src/common/config.rs

//! File-backed configuration for the resilience layer.

use crate::common::error::Result;
use crate::failover::FailoverConfig;
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Combined configuration for retry and failover.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retry policy
    pub retry: RetryConfig,
    /// Failover policy
    pub failover: FailoverConfig,
}

impl ResilienceConfig {
    /// Load a configuration from a JSON file. Both sections are validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ResilienceConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration to a JSON file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.failover.validate()
    }
}

/// Serde helper encoding a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
