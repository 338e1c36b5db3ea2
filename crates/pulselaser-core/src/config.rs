//! Engine configuration
//!
//! All options have defaults; a JSON file only needs to name the ones it
//! changes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::protocol::{ProbeConfig, ProtocolError};
use crate::status::DEFAULT_ENERGY_SAMPLE_CAPACITY;

/// Communication engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Port to try first; `None` probes every port
    pub port_name: Option<String>,
    /// Interval between status-query bundles
    pub poll_interval_ms: u64,
    /// Number of raw inbound frames kept for diagnostics
    pub history_capacity: usize,
    /// Sleep at the end of every loop iteration
    pub idle_delay_ms: u64,
    /// Delay before the loop starts after the port is bound
    pub startup_delay_ms: u64,
    /// Maximum reads per loop iteration
    pub read_burst_limit: usize,
    /// Maximum energy samples kept in the status model
    pub energy_sample_capacity: usize,
    /// Consecutive I/O failures after which the engine gives up
    pub max_consecutive_io_failures: u32,
    /// How long shutdown waits for the worker
    pub shutdown_timeout_ms: u64,
    /// Port discovery timing
    pub probe: ProbeConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port_name: None,
            poll_interval_ms: 500,
            history_capacity: 1000,
            idle_delay_ms: 20,
            startup_delay_ms: 100,
            read_burst_limit: 10,
            energy_sample_capacity: DEFAULT_ENERGY_SAMPLE_CAPACITY,
            max_consecutive_io_failures: 5,
            shutdown_timeout_ms: 2000,
            probe: ProbeConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON text
    pub fn from_json_str(text: &str) -> Result<Self, ProtocolError> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.history_capacity == 0 {
            return Err(ProtocolError::InvalidConfig(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        if self.read_burst_limit == 0 {
            return Err(ProtocolError::InvalidConfig(
                "read_burst_limit must be at least 1".to_string(),
            ));
        }
        if self.max_consecutive_io_failures == 0 {
            return Err(ProtocolError::InvalidConfig(
                "max_consecutive_io_failures must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
