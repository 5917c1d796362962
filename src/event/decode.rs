use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::Path;

use super::{
    OrchestratorEvent, OrchestratorEventKind, RawEvent, AGENT_ERROR, AGENT_MESSAGE,
    AGENT_THINKING, AGENT_TOOL_USE, AGENT_TRANSITION, AGENT_TURN, STAGE_CHANGED, USAGE_UPDATED,
};
use crate::error::EventLogError;
use crate::model::{AgentId, StageId, TaskId, ToolName};

const AGENT_KEYS: &[&str] = &["agent", "agentId", "agent_id"];
const TASK_KEYS: &[&str] = &["taskId", "task_id"];
const INPUT_TOKEN_KEYS: &[&str] = &["inputTokens", "input_tokens", "promptTokens", "prompt_tokens"];
const OUTPUT_TOKEN_KEYS: &[&str] = &[
    "outputTokens",
    "output_tokens",
    "completionTokens",
    "completion_tokens",
];
const TOTAL_TOKEN_KEYS: &[&str] = &["tokens", "totalTokens", "total_tokens"];
const TOOL_NAME_KEYS: &[&str] = &["tool", "toolName", "tool_name", "name"];
const TOOL_INPUT_KEYS: &[&str] = &["input", "args", "arguments"];
const FROM_KEYS: &[&str] = &["from", "previousAgent", "previous_agent", "fromAgent"];
const TO_KEYS: &[&str] = &["to", "nextAgent", "next_agent", "toAgent"];
const STAGE_KEYS: &[&str] = &["stage", "stageId", "stage_id", "name"];
const THINKING_KEYS: &[&str] = &["text", "thinking", "content"];
const ERROR_KEYS: &[&str] = &["message", "error"];

/// Tool input is summarised, never stored whole.
const TOOL_INPUT_SUMMARY_CHARS: usize = 200;

/// Safely truncate a string to a maximum character count (not bytes).
/// Prevents panics from slicing on multibyte UTF-8 character boundaries.
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> String {
    let char_count = s.chars().count();
    if char_count <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect::<String>() + "..."
    }
}

/// First non-empty string found under any of `keys`.
fn str_field<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| payload.get(*k))
        .filter_map(Value::as_str)
        .find(|s| !s.trim().is_empty())
}

/// Identifier under any of `keys`: a string, an integer, or an object
/// carrying `id` / `name`.
fn id_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| payload.get(*k)).find_map(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) if n.is_u64() || n.is_i64() => Some(n.to_string()),
        Value::Object(_) => id_field(v, &["id", "name"]),
        _ => None,
    })
}

/// Non-negative count under any of `keys`.
///
/// Negative numbers clamp to 0, floats are floored, numeric strings are
/// accepted. `None` only when no key holds anything number-like.
fn count_field(payload: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter()
        .filter_map(|k| payload.get(*k))
        .find_map(count_value)
}

fn count_value(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Some(u)
            } else if n.as_i64().is_some() {
                // Only negative integers land here
                Some(0)
            } else {
                n.as_f64().map(clamp_float)
            }
        }
        Value::String(s) => s.trim().parse::<f64>().ok().map(clamp_float),
        _ => None,
    }
}

fn clamp_float(f: f64) -> u64 {
    if f.is_finite() && f > 0.0 {
        // `as` saturates at u64::MAX
        f.floor() as u64
    } else {
        0
    }
}

/// Payload timestamp as RFC 3339 text or epoch milliseconds.
fn timestamp_field(payload: &Value) -> Option<DateTime<Utc>> {
    match payload.get("timestamp")? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// Human-readable summary of a tool input of any JSON shape.
fn summarize_input(payload: &Value) -> String {
    let summary = match TOOL_INPUT_KEYS.iter().find_map(|k| payload.get(*k)) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };
    truncate_str(&summary, TOOL_INPUT_SUMMARY_CHARS)
}

fn error_message(payload: &Value) -> String {
    for key in ERROR_KEYS {
        match payload.get(*key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return s.clone(),
            Some(obj @ Value::Object(_)) => {
                if let Some(s) = str_field(obj, &["message"]) {
                    return s.to_string();
                }
            }
            _ => {}
        }
    }
    "unknown error".to_string()
}

fn usage_kind(payload: &Value) -> OrchestratorEventKind {
    // Counts may sit at the top level or under a nested `usage` object
    let nested = payload.get("usage");
    let lookup = |keys: &[&str]| {
        count_field(payload, keys).or_else(|| nested.and_then(|n| count_field(n, keys)))
    };

    let input = lookup(INPUT_TOKEN_KEYS).unwrap_or(0);
    let output = lookup(OUTPUT_TOKEN_KEYS).unwrap_or(0);
    OrchestratorEventKind::usage(input, output, lookup(TOTAL_TOKEN_KEYS))
}

/// Decode a raw event into its typed form.
///
/// # Functional Core
/// Pure function. Never fails on malformed payloads: missing or invalid
/// fields fall back to defaults. Returns `None` only for names the
/// aggregator does not handle.
pub fn decode_event(raw: &RawEvent) -> Option<OrchestratorEvent> {
    let payload = &raw.payload;
    let mut agent = id_field(payload, AGENT_KEYS).and_then(|s| AgentId::parse(&s));

    let kind = match raw.name.as_str() {
        USAGE_UPDATED => usage_kind(payload),
        AGENT_TOOL_USE => {
            let tool_name = str_field(payload, TOOL_NAME_KEYS)
                .and_then(ToolName::parse)
                .unwrap_or_else(|| ToolName::new("unknown"));
            OrchestratorEventKind::ToolUse {
                tool_name,
                input_summary: summarize_input(payload),
            }
        }
        AGENT_TRANSITION => {
            let from = id_field(payload, FROM_KEYS).and_then(|s| AgentId::parse(&s));
            let to = id_field(payload, TO_KEYS)
                .and_then(|s| AgentId::parse(&s))
                .or_else(|| agent.clone());
            agent = to.clone();
            OrchestratorEventKind::transition(from, to)
        }
        STAGE_CHANGED => {
            let stage = id_field(payload, STAGE_KEYS).and_then(|s| StageId::parse(&s));
            OrchestratorEventKind::stage_changed(stage)
        }
        AGENT_TURN => OrchestratorEventKind::Turn,
        AGENT_MESSAGE => OrchestratorEventKind::Message,
        AGENT_THINKING => OrchestratorEventKind::thinking(
            str_field(payload, THINKING_KEYS).unwrap_or_default().to_string(),
        ),
        AGENT_ERROR => OrchestratorEventKind::error(error_message(payload)),
        _ => return None,
    };

    Some(OrchestratorEvent {
        timestamp: timestamp_field(payload).unwrap_or(raw.received_at),
        kind,
        task_id: id_field(payload, TASK_KEYS).and_then(|s| TaskId::parse(&s)),
        agent_id: agent,
    })
}

/// Parse a JSONL event log into raw events.
///
/// Each line is either `{"event": name, "payload": {...}}` or a flat object
/// with an `event` (or `name`) field, in which case the whole object is the
/// payload. Unparseable lines are skipped (a log still being written can end
/// in a partial line).
pub fn parse_event_log(content: &str) -> Vec<RawEvent> {
    let mut events = Vec::new();

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let entry: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let Some((name_key, name)) = ["event", "name"].into_iter().find_map(|key| {
            str_field(&entry, &[key]).map(|n| (key, n.to_string()))
        }) else {
            continue;
        };

        let payload = match entry.get("payload") {
            Some(p) => p.clone(),
            None => {
                // The name key must not leak into payload fields that share it
                let mut flat = entry.clone();
                if let Some(obj) = flat.as_object_mut() {
                    obj.remove(name_key);
                }
                flat
            }
        };

        let received_at = entry
            .get("received_at")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .or_else(|| timestamp_field(&payload))
            .unwrap_or_else(Utc::now);

        events.push(RawEvent::at(name, payload, received_at));
    }

    events
}

/// Read and parse a JSONL event log from disk.
pub fn load_event_log(path: &Path) -> Result<Vec<RawEvent>, EventLogError> {
    let content = std::fs::read_to_string(path).map_err(|source| EventLogError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(parse_event_log(&content))
}
