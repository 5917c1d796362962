use orchestrator_telemetry::aggregator::replay;
use orchestrator_telemetry::error::EventLogError;
use orchestrator_telemetry::event::{decode_event, load_event_log, parse_event_log};
use orchestrator_telemetry::model::{AgentId, StageId, TaskId};
use orchestrator_telemetry::{AggregatorConfig, OrchestratorEventKind, RawEvent};
use serde_json::json;
use std::fs;
use std::io::Write;
use std::time::Duration;
use tempfile::TempDir;

const SESSION_LOG: &str = r#"{"event":"stage:changed","payload":{"stage":"plan","timestamp":"2026-03-01T09:00:00Z"}}
{"event":"agent:transition","payload":{"to":"planner","timestamp":"2026-03-01T09:00:00Z","taskId":"T1"}}
{"event":"usage:updated","payload":{"agent":"planner","usage":{"input_tokens":120,"output_tokens":80},"timestamp":"2026-03-01T09:00:04Z","taskId":"T1"}}
{"event":"agent:tool-use","payload":{"agent":"planner","toolName":"Read","args":{"path":"Cargo.toml"},"taskId":"T1"}}
{"event":"agent:thinking","payload":{"agent":"planner","content":"Split the work in two","taskId":"T1"}}
{"event":"agent:turn","payload":{"agent":"planner","taskId":"T1"}}
{"event":"agent:transition","payload":{"from":"planner","to":"coder","timestamp":"2026-03-01T09:00:10Z","taskId":"T1"}}
{"event":"usage:updated","payload":{"agent":"coder","tokens":999,"taskId":"T2"}}
{"event":"stage:changed","payload":{"stage":"build","agent":"coder","timestamp":"2026-03-01T09:01:00Z"}}
{"event":"agent:message","agent":"coder","taskId":"T1","timestamp":"2026-03-01T09:01:05Z"}
{"event":"agent:heartbeat","payload":{"agent":"coder"}}
"#;

#[test]
fn replay_session_log_with_filter() {
    let events = parse_event_log(SESSION_LOG);
    assert_eq!(events.len(), 11);

    let filter = TaskId::new("T1");
    let snapshot = replay(events, Some(&filter), &AggregatorConfig::default());

    let planner = AgentId::new("planner");
    let coder = AgentId::new("coder");

    let tokens = snapshot.tokens(&planner).unwrap();
    assert_eq!(tokens.total_tokens, 200);
    assert_eq!(tokens.tokens_per_second, 50.0);
    assert!(snapshot.tokens(&coder).is_none());

    assert_eq!(snapshot.tool_calls(&planner), 1);
    assert_eq!(
        snapshot.last_tool_call[&planner].input_summary,
        r#"{"path":"Cargo.toml"}"#
    );
    assert_eq!(snapshot.thinking_text[&planner], "Split the work in two");
    assert_eq!(snapshot.turns(&planner), 1);
    assert_eq!(snapshot.messages(&coder), 1);

    let plan = snapshot.timings_for_stage(&StageId::new("plan")).unwrap();
    assert_eq!(plan[&planner].total, Duration::from_secs(10));

    assert_eq!(snapshot.timing.stage, Some(StageId::new("build")));
    assert_eq!(snapshot.timing.current_agent, Some(coder));
    assert_eq!(snapshot.stats.events_filtered, 1);
    assert_eq!(snapshot.stats.events_unknown, 1);
    assert_eq!(snapshot.stats.events_applied, 9);
}

#[test]
fn load_event_log_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("events.jsonl");
    let mut file = fs::File::create(&path).unwrap();
    writeln!(file, r#"{{"event":"agent:turn","payload":{{"agent":"a"}}}}"#).unwrap();
    writeln!(file, r#"{{"event":"agent:turn","payload":{{"agent":"a"}}"#).unwrap();

    let events = load_event_log(&path).unwrap();

    // Second line is truncated mid-write and skipped
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "agent:turn");
}

#[test]
fn load_event_log_missing_file() {
    let dir = TempDir::new().unwrap();
    let result = load_event_log(&dir.path().join("nope.jsonl"));

    match result {
        Err(EventLogError::Io { path, source }) => {
            assert!(path.ends_with("nope.jsonl"));
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("Expected Io error, got {:?}", other),
    }
}

#[test]
fn empty_log_replays_to_empty_snapshot() {
    let snapshot = replay(parse_event_log(""), None, &AggregatorConfig::default());
    assert!(snapshot.agents().is_empty());
    assert_eq!(snapshot.stats.events_applied, 0);
}

#[test]
fn decode_tool_use_long_input_is_summarised() {
    let raw = RawEvent::new(
        "agent:tool-use",
        json!({"agent": "a", "tool": "Write", "input": "x".repeat(1_000)}),
    );
    let event = decode_event(&raw).unwrap();

    match event.kind {
        OrchestratorEventKind::ToolUse { input_summary, .. } => {
            assert!(input_summary.ends_with("..."));
            assert_eq!(input_summary.chars().count(), 203);
        }
        other => panic!("Expected ToolUse, got {:?}", other),
    }
}

#[test]
fn decode_agent_as_object() {
    let raw = RawEvent::new("agent:turn", json!({"agent": {"id": "reviewer", "role": "qa"}}));
    let event = decode_event(&raw).unwrap();
    assert_eq!(event.agent_id, Some(AgentId::new("reviewer")));
}

#[test]
fn flat_line_named_by_name_key_keeps_stage_from_payload() {
    let events = parse_event_log(r#"{"name":"stage:changed","timestamp":1000}"#);
    assert_eq!(events.len(), 1);
    assert!(events[0].payload.get("name").is_none());

    let event = decode_event(&events[0]).unwrap();
    assert_eq!(event.kind, OrchestratorEventKind::stage_changed(None));
}

#[test]
fn flat_line_named_by_name_key_does_not_become_tool_name() {
    let events = parse_event_log(r#"{"name":"agent:tool-use","agent":"a"}"#);
    let event = decode_event(&events[0]).unwrap();

    match event.kind {
        OrchestratorEventKind::ToolUse { tool_name, .. } => {
            assert_eq!(tool_name.as_str(), "unknown");
        }
        other => panic!("Expected ToolUse, got {:?}", other),
    }
}

#[test]
fn flat_line_with_event_key_still_reads_name_field() {
    let log = r#"{"event":"stage:changed","stage":"plan","timestamp":0}
{"event":"stage:changed","name":"build","timestamp":5000}
"#;
    let snapshot = replay(parse_event_log(log), None, &AggregatorConfig::default());

    assert_eq!(snapshot.timing.stage, Some(StageId::new("build")));
    assert_eq!(snapshot.stage_history.len(), 1);
    assert_eq!(snapshot.stage_history[0].stage, StageId::new("plan"));
}
