//! Runtime configuration.
//!
//! All structs have defaults suitable for embedded use and tests, and load
//! from JSON where every field is optional.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, FlowResult, ValidationError};

/// Rule engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleEngineConfig {
    /// How long a pending `(item, timestamp)` join slot waits for its
    /// co-timestamped facts, measured from arrival of its first fact.
    pub retention_window_ms: u64,
    /// How long a fired binding tuple is remembered for duplicate suppression.
    /// Facts replayed after this horizon fire the rule again.
    pub fired_retention_ms: u64,
    /// Number of independently locked partitions of the pending join table.
    pub pending_shards: usize,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            retention_window_ms: 10_000,
            fired_retention_ms: 600_000,
            pending_shards: 16,
        }
    }
}

/// External action dispatcher tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Max queued external calls before new ones are dropped.
    pub queue_capacity: usize,
    /// Name of the worker thread.
    pub worker_name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            worker_name: "kyroflow-dispatch".to_string(),
        }
    }
}

/// Top-level platform configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub rule_engine: RuleEngineConfig,
    pub dispatcher: DispatcherConfig,
    /// Max depth of `add_data` cascades triggered by one external write.
    pub max_chain_depth: usize,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            rule_engine: RuleEngineConfig::default(),
            dispatcher: DispatcherConfig::default(),
            max_chain_depth: 16,
        }
    }
}

impl PlatformConfig {
    /// Parses a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on malformed JSON or out-of-range values.
    pub fn from_json_str(json: &str) -> FlowResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| ValidationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads and parses a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> FlowResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ValidationError::InvalidConfig {
            reason: format!("{}: {e}", path.display()),
        })?;
        Self::from_json_str(&text)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> FlowResult<()> {
        let invalid = |reason: &str| -> FlowError {
            ValidationError::InvalidConfig {
                reason: reason.to_string(),
            }
            .into()
        };
        if self.rule_engine.retention_window_ms == 0 {
            return Err(invalid("rule_engine.retention_window_ms must be positive"));
        }
        if self.rule_engine.pending_shards == 0 {
            return Err(invalid("rule_engine.pending_shards must be positive"));
        }
        if self.dispatcher.queue_capacity == 0 {
            return Err(invalid("dispatcher.queue_capacity must be positive"));
        }
        if self.max_chain_depth == 0 {
            return Err(invalid("max_chain_depth must be positive"));
        }
        Ok(())
    }
}
