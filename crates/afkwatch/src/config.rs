//! Proxy configuration, loaded from JSON.
//!
//! Every field has a default, so `{}` is a valid config file:
//!
//! ```json
//! {
//!   "bind_addr": "0.0.0.0:9000",
//!   "idle_threshold_ms": 300000,
//!   "afk_threshold_ms": 600000,
//!   "action": { "kind": "teleport_limbo", "limbo": "limbo" },
//!   "disabled_nodes": ["lobby"]
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use afkwatch_protocol::NodeId;
use afkwatch_session::RegistryConfig;
use afkwatch_tick::TickConfig;
use afkwatch_tracker::{AfkAction, AfkPolicy};
use afkwatch_transport::{BackoffConfig, TransportConfig};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Settings for one proxy instance. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AfkConfig {
    /// Address node connections are accepted on.
    pub bind_addr: String,
    pub idle_threshold_ms: u64,
    pub afk_threshold_ms: u64,
    /// How often every session is checked against the thresholds.
    pub sweep_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub handshake_timeout_ms: u64,
    pub backoff_floor_ms: u64,
    pub backoff_ceiling_ms: u64,
    /// Uptime after which a node's backoff starts over from the floor.
    pub backoff_reset_after_ms: u64,
    /// How long a LEAVE blocks older arrivals for the same player.
    pub tombstone_ttl_ms: u64,
    /// Commands buffered per node connection.
    pub outbound_queue: usize,
    /// Events buffered in front of the proxy loop.
    pub input_queue: usize,
    pub action: AfkAction,
    pub warn_message: String,
    pub disconnect_reason: String,
    /// Nodes whose players are never warned or acted on.
    pub disabled_nodes: Vec<NodeId>,
}

impl Default for AfkConfig {
    fn default() -> Self {
        let policy = AfkPolicy::default();
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            idle_threshold_ms: 300_000,
            afk_threshold_ms: 600_000,
            sweep_interval_ms: 500,
            heartbeat_interval_ms: 5_000,
            handshake_timeout_ms: 5_000,
            backoff_floor_ms: 1_000,
            backoff_ceiling_ms: 30_000,
            backoff_reset_after_ms: 60_000,
            tombstone_ttl_ms: 30_000,
            outbound_queue: 256,
            input_queue: 1_024,
            action: policy.action,
            warn_message: policy.warn_message,
            disconnect_reason: policy.disconnect_reason,
            disabled_nodes: Vec::new(),
        }
    }
}

impl AfkConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("idle_threshold_ms", self.idle_threshold_ms),
            ("afk_threshold_ms", self.afk_threshold_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("backoff_floor_ms", self.backoff_floor_ms),
            ("backoff_ceiling_ms", self.backoff_ceiling_ms),
            ("backoff_reset_after_ms", self.backoff_reset_after_ms),
            ("tombstone_ttl_ms", self.tombstone_ttl_ms),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be positive")));
        }
        if self.outbound_queue == 0 {
            return Err(ConfigError::Invalid("outbound_queue must be positive".into()));
        }
        if self.input_queue == 0 {
            return Err(ConfigError::Invalid("input_queue must be positive".into()));
        }
        if self.backoff_ceiling_ms < self.backoff_floor_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff_ceiling_ms ({}) is below backoff_floor_ms ({})",
                self.backoff_ceiling_ms, self.backoff_floor_ms
            )));
        }
        if self.sweep_interval_ms >= self.idle_threshold_ms {
            return Err(ConfigError::Invalid(format!(
                "sweep_interval_ms ({}) must be shorter than idle_threshold_ms ({})",
                self.sweep_interval_ms, self.idle_threshold_ms
            )));
        }
        self.transport()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        // Threshold order and the limbo name are policy rules.
        self.policy().validate()?;
        Ok(())
    }

    pub fn policy(&self) -> AfkPolicy {
        AfkPolicy {
            idle_threshold: Duration::from_millis(self.idle_threshold_ms),
            afk_threshold: Duration::from_millis(self.afk_threshold_ms),
            action: self.action.clone(),
            warn_message: self.warn_message.clone(),
            disconnect_reason: self.disconnect_reason.clone(),
            disabled_nodes: self.disabled_nodes.iter().cloned().collect(),
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            outbound_queue: self.outbound_queue,
            backoff: BackoffConfig {
                floor: Duration::from_millis(self.backoff_floor_ms),
                ceiling: Duration::from_millis(self.backoff_ceiling_ms),
                reset_after: Duration::from_millis(self.backoff_reset_after_ms),
                ..BackoffConfig::default()
            },
        }
    }

    /// Sweep schedule. Start jitter is a tenth of the interval.
    pub fn tick(&self) -> TickConfig {
        let interval = Duration::from_millis(self.sweep_interval_ms);
        TickConfig {
            initial_jitter: interval / 10,
            ..TickConfig::every(interval)
        }
    }

    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            tombstone_ttl: Duration::from_millis(self.tombstone_ttl_ms),
        }
    }
}
