use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

use super::ids::ToolName;
use super::serde_utils::{duration_millis, duration_opt_millis};

/// Accumulated token usage for one agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentTokens {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Throughput over the current rate window (see `RateBasis`)
    #[serde(default)]
    pub tokens_per_second: f64,
}

impl AgentTokens {
    pub fn add(&mut self, input: u64, output: u64, total: u64) {
        self.input_tokens = self.input_tokens.saturating_add(input);
        self.output_tokens = self.output_tokens.saturating_add(output);
        self.total_tokens = self.total_tokens.saturating_add(total);
    }
}

/// Response-time samples for one agent within a stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentTiming {
    pub samples: u64,
    #[serde(with = "duration_millis")]
    pub total: Duration,
    #[serde(
        default,
        with = "duration_opt_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub last: Option<Duration>,
    #[serde(
        default,
        with = "duration_opt_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub average: Option<Duration>,
    /// Most recent samples in milliseconds, oldest first
    #[serde(default)]
    pub recent_ms: VecDeque<u64>,
}

impl AgentTiming {
    /// Record one response-time sample, keeping at most `capacity` recent samples.
    pub fn record(&mut self, elapsed: Duration, capacity: usize) {
        self.samples = self.samples.saturating_add(1);
        self.total = self.total.saturating_add(elapsed);
        self.last = Some(elapsed);
        self.average = u32::try_from(self.samples)
            .ok()
            .and_then(|n| self.total.checked_div(n));

        while self.recent_ms.len() >= capacity.max(1) {
            self.recent_ms.pop_front();
        }
        self.recent_ms
            .push_back(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
    }
}

/// The most recent tool invocation by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub tool_name: ToolName,
    pub input_summary: String,
    pub at: DateTime<Utc>,
}

impl ToolCallRecord {
    pub fn new(tool_name: ToolName, input_summary: String, at: DateTime<Utc>) -> Self {
        Self {
            tool_name,
            input_summary,
            at,
        }
    }
}

/// The most recent error reported for an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub message: String,
    pub at: DateTime<Utc>,
}
