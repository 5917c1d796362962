use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

pub const ENV_THINKING_MAX_CHARS: &str = "ORCH_TELEMETRY_THINKING_MAX_CHARS";
pub const ENV_RESPONSE_SAMPLES: &str = "ORCH_TELEMETRY_RESPONSE_SAMPLES";
pub const ENV_STAGE_HISTORY: &str = "ORCH_TELEMETRY_STAGE_HISTORY";
pub const ENV_RATE_BASIS: &str = "ORCH_TELEMETRY_RATE_BASIS";

/// Window used as the denominator of tokens-per-second.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateBasis {
    /// Seconds since the current stage started
    #[default]
    Stage,
    /// Seconds since the agent's own response timer started
    Agent,
}

impl std::str::FromStr for RateBasis {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stage" => Ok(RateBasis::Stage),
            "agent" => Ok(RateBasis::Agent),
            _ => Err(ConfigError::InvalidValue {
                key: "rate_basis".into(),
                value: s.to_string(),
            }),
        }
    }
}

/// Tunables for the aggregator. Every field has a default so a partial
/// JSON file (or none at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Max characters kept from thinking and error text
    pub thinking_max_chars: usize,

    /// Recent response-time samples kept per agent
    pub response_sample_capacity: usize,

    /// Completed stages whose timings are retained
    pub stage_history_capacity: usize,

    pub rate_basis: RateBasis,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            thinking_max_chars: 500,
            response_sample_capacity: 100,
            stage_history_capacity: 16,
            rate_basis: RateBasis::Stage,
        }
    }
}

impl AggregatorConfig {
    /// Parse from a JSON document, then validate.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()
    }

    /// Load from a JSON file on disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&content)
    }

    /// Apply `ORCH_TELEMETRY_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`.
    ///
    /// Pure apart from whatever `lookup` does, so tests can pass a map
    /// instead of touching the real environment.
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_THINKING_MAX_CHARS) {
            self.thinking_max_chars = parse_usize(ENV_THINKING_MAX_CHARS, &v)?;
        }
        if let Some(v) = lookup(ENV_RESPONSE_SAMPLES) {
            self.response_sample_capacity = parse_usize(ENV_RESPONSE_SAMPLES, &v)?;
        }
        if let Some(v) = lookup(ENV_STAGE_HISTORY) {
            self.stage_history_capacity = parse_usize(ENV_STAGE_HISTORY, &v)?;
        }
        if let Some(v) = lookup(ENV_RATE_BASIS) {
            self.rate_basis = v.parse()?;
        }
        self.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        let checks = [
            ("thinking_max_chars", self.thinking_max_chars),
            ("response_sample_capacity", self.response_sample_capacity),
            ("stage_history_capacity", self.stage_history_capacity),
        ];
        for (key, value) in checks {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.into(),
                    value: value.to_string(),
                });
            }
        }
        Ok(self)
    }
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key: key.into(),
            value: value.to_string(),
        })
}
