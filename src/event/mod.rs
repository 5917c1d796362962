pub mod decode;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{AgentId, StageId, TaskId, ToolName};

pub use decode::{decode_event, load_event_log, parse_event_log};

pub const USAGE_UPDATED: &str = "usage:updated";
pub const AGENT_TOOL_USE: &str = "agent:tool-use";
pub const AGENT_TRANSITION: &str = "agent:transition";
pub const AGENT_TURN: &str = "agent:turn";
pub const AGENT_MESSAGE: &str = "agent:message";
pub const AGENT_THINKING: &str = "agent:thinking";
pub const AGENT_ERROR: &str = "agent:error";
pub const STAGE_CHANGED: &str = "stage:changed";

/// Every event name the aggregator registers a handler for.
pub const SUBSCRIBED_EVENTS: [&str; 8] = [
    USAGE_UPDATED,
    AGENT_TOOL_USE,
    AGENT_TRANSITION,
    AGENT_TURN,
    AGENT_MESSAGE,
    AGENT_THINKING,
    AGENT_ERROR,
    STAGE_CHANGED,
];

/// A named event exactly as the source delivered it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEvent {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl RawEvent {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self::at(name, payload, Utc::now())
    }

    pub fn at(name: impl Into<String>, payload: Value, received_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            payload,
            received_at,
        }
    }
}

/// A decoded event. Numeric fields are already clamped and text is owned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: OrchestratorEventKind,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub agent_id: Option<AgentId>,
}

impl OrchestratorEvent {
    pub fn new(timestamp: DateTime<Utc>, kind: OrchestratorEventKind) -> Self {
        Self {
            timestamp,
            kind,
            task_id: None,
            agent_id: None,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<TaskId>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_agent(mut self, agent_id: impl Into<AgentId>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEventKind {
    UsageUpdated {
        input_tokens: u64,
        output_tokens: u64,
        total_tokens: u64,
    },
    ToolUse {
        tool_name: ToolName,
        #[serde(default)]
        input_summary: String,
    },
    Transition {
        #[serde(default)]
        from: Option<AgentId>,
        #[serde(default)]
        to: Option<AgentId>,
    },
    StageChanged {
        #[serde(default)]
        stage: Option<StageId>,
    },
    Turn,
    Message,
    Thinking {
        text: String,
    },
    Error {
        message: String,
    },
}

impl OrchestratorEventKind {
    /// Usage with an explicit total; `None` means input + output.
    pub fn usage(input_tokens: u64, output_tokens: u64, total_tokens: Option<u64>) -> Self {
        Self::UsageUpdated {
            input_tokens,
            output_tokens,
            total_tokens: total_tokens
                .unwrap_or_else(|| input_tokens.saturating_add(output_tokens)),
        }
    }

    pub fn tool_use(tool_name: impl Into<ToolName>, input_summary: String) -> Self {
        Self::ToolUse {
            tool_name: tool_name.into(),
            input_summary,
        }
    }

    pub fn transition(from: Option<AgentId>, to: Option<AgentId>) -> Self {
        Self::Transition { from, to }
    }

    pub fn stage_changed(stage: Option<StageId>) -> Self {
        Self::StageChanged { stage }
    }

    pub fn thinking(text: String) -> Self {
        Self::Thinking { text }
    }

    pub fn error(message: String) -> Self {
        Self::Error { message }
    }

    /// Whether the reducer needs a resolved agent to apply this event.
    pub fn requires_agent(&self) -> bool {
        !matches!(self, Self::Transition { .. } | Self::StageChanged { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::UsageUpdated { .. } => USAGE_UPDATED,
            Self::ToolUse { .. } => AGENT_TOOL_USE,
            Self::Transition { .. } => AGENT_TRANSITION,
            Self::StageChanged { .. } => STAGE_CHANGED,
            Self::Turn => AGENT_TURN,
            Self::Message => AGENT_MESSAGE,
            Self::Thinking { .. } => AGENT_THINKING,
            Self::Error { .. } => AGENT_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_defaults_total_to_sum() {
        let kind = OrchestratorEventKind::usage(10, 5, None);
        assert_eq!(
            kind,
            OrchestratorEventKind::UsageUpdated {
                input_tokens: 10,
                output_tokens: 5,
                total_tokens: 15
            }
        );
    }

    #[test]
    fn event_serializes_with_event_tag() {
        let event = OrchestratorEvent::new(Utc::now(), OrchestratorEventKind::Turn).with_agent("a");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "turn");
        assert_eq!(json["agent_id"], "a");
    }

    #[test]
    fn names_cover_subscribed_events() {
        let kinds = [
            OrchestratorEventKind::usage(0, 0, None),
            OrchestratorEventKind::tool_use("Read", String::new()),
            OrchestratorEventKind::transition(None, None),
            OrchestratorEventKind::stage_changed(None),
            OrchestratorEventKind::Turn,
            OrchestratorEventKind::Message,
            OrchestratorEventKind::thinking(String::new()),
            OrchestratorEventKind::error(String::new()),
        ];
        for kind in kinds {
            assert!(SUBSCRIBED_EVENTS.contains(&kind.name()));
        }
    }

    #[test]
    fn transitions_and_stage_changes_need_no_agent() {
        assert!(!OrchestratorEventKind::transition(None, None).requires_agent());
        assert!(!OrchestratorEventKind::stage_changed(None).requires_agent());
        assert!(OrchestratorEventKind::Turn.requires_agent());
    }
}
