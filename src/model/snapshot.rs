use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::ids::{AgentId, StageId};
use super::metrics::{AgentTiming, AgentTokens, ErrorRecord, ToolCallRecord};

/// Aggregate telemetry for one subscription.
/// Mutated only through `aggregator::update`; consumers get `&Snapshot`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub agent_tokens: BTreeMap<AgentId, AgentTokens>,

    /// Response timings for the current stage only
    pub agent_timings: BTreeMap<AgentId, AgentTiming>,

    pub turn_count: BTreeMap<AgentId, u64>,

    pub last_tool_call: BTreeMap<AgentId, ToolCallRecord>,

    pub tool_call_count: BTreeMap<AgentId, u64>,

    pub conversation_length: BTreeMap<AgentId, u64>,

    /// Latest thinking text per agent, already truncated
    pub thinking_text: BTreeMap<AgentId, String>,

    pub last_error: BTreeMap<AgentId, ErrorRecord>,

    pub error_count: BTreeMap<AgentId, u64>,

    /// Timings of completed stages, oldest first
    pub stage_history: VecDeque<StageTimings>,

    pub timing: TimingContext,

    pub stats: SnapshotStats,
}

/// Timing state that a stage change wipes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TimingContext {
    pub stage: Option<StageId>,
    pub stage_started_at: Option<DateTime<Utc>>,
    /// Agent currently holding the floor, set by transitions
    pub current_agent: Option<AgentId>,
    /// In-flight response timers
    pub agent_started_at: BTreeMap<AgentId, DateTime<Utc>>,
    /// Tokens per agent since the stage started
    pub stage_tokens: BTreeMap<AgentId, u64>,
}

/// Agent timings archived when their stage ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageTimings {
    pub stage: StageId,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub timings: BTreeMap<AgentId, AgentTiming>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotStats {
    pub events_applied: u64,
    /// Dropped because of a task-filter mismatch
    pub events_filtered: u64,
    /// Dropped because no agent could be resolved
    pub events_unattributed: u64,
    /// Names the aggregator does not understand
    pub events_unknown: u64,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every agent that appears in any metric map.
    pub fn agents(&self) -> BTreeSet<AgentId> {
        self.agent_tokens
            .keys()
            .chain(self.agent_timings.keys())
            .chain(self.turn_count.keys())
            .chain(self.last_tool_call.keys())
            .chain(self.conversation_length.keys())
            .chain(self.thinking_text.keys())
            .chain(self.error_count.keys())
            .chain(self.last_error.keys())
            .cloned()
            .collect()
    }

    /// Timings recorded for `stage`, looking at the current stage first.
    pub fn timings_for_stage(&self, stage: &StageId) -> Option<&BTreeMap<AgentId, AgentTiming>> {
        if self.timing.stage.as_ref() == Some(stage) {
            return Some(&self.agent_timings);
        }
        self.stage_history
            .iter()
            .rev()
            .find(|s| &s.stage == stage)
            .map(|s| &s.timings)
    }

    pub fn tokens(&self, agent: &AgentId) -> Option<&AgentTokens> {
        self.agent_tokens.get(agent)
    }

    pub fn turns(&self, agent: &AgentId) -> u64 {
        self.turn_count.get(agent).copied().unwrap_or(0)
    }

    pub fn tool_calls(&self, agent: &AgentId) -> u64 {
        self.tool_call_count.get(agent).copied().unwrap_or(0)
    }

    pub fn messages(&self, agent: &AgentId) -> u64 {
        self.conversation_length.get(agent).copied().unwrap_or(0)
    }

    pub fn errors(&self, agent: &AgentId) -> u64 {
        self.error_count.get(agent).copied().unwrap_or(0)
    }
}
