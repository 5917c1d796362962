use chrono::{DateTime, TimeDelta, Utc};

use crate::config::{AggregatorConfig, RateBasis};
use crate::event::decode::truncate_str;
use crate::event::{OrchestratorEvent, OrchestratorEventKind};
use crate::model::{
    AgentId, ErrorRecord, Snapshot, StageId, StageTimings, TaskId, TimingContext, ToolCallRecord,
};

/// Task-filter predicate. Events without a task id always pass.
pub fn accepts(filter: Option<&TaskId>, event: &OrchestratorEvent) -> bool {
    match (filter, event.task_id.as_ref()) {
        (Some(wanted), Some(actual)) => wanted == actual,
        _ => true,
    }
}

/// Agent an event is attributed to: its own, else whoever holds the floor.
pub fn resolve_agent(snapshot: &Snapshot, event: &OrchestratorEvent) -> Option<AgentId> {
    event
        .agent_id
        .clone()
        .or_else(|| snapshot.timing.current_agent.clone())
}

/// Reducer: fold one event into the snapshot.
///
/// Deterministic: all time arithmetic uses `event.timestamp`, never the wall
/// clock. Never panics on odd input; events that cannot be attributed to an
/// agent are counted and otherwise ignored.
pub fn update(snapshot: &mut Snapshot, event: &OrchestratorEvent, config: &AggregatorConfig) {
    let agent = if event.kind.requires_agent() {
        match resolve_agent(snapshot, event) {
            Some(agent) => Some(agent),
            None => {
                tracing::trace!(event = event.kind.name(), "no agent context, event dropped");
                snapshot.stats.events_unattributed += 1;
                return;
            }
        }
    } else {
        None
    };

    let ts = event.timestamp;

    match (&event.kind, agent) {
        (
            OrchestratorEventKind::UsageUpdated {
                input_tokens,
                output_tokens,
                total_tokens,
            },
            Some(agent),
        ) => apply_usage(
            snapshot,
            agent,
            (*input_tokens, *output_tokens, *total_tokens),
            ts,
            config.rate_basis,
        ),

        (
            OrchestratorEventKind::ToolUse {
                tool_name,
                input_summary,
            },
            Some(agent),
        ) => {
            *snapshot.tool_call_count.entry(agent.clone()).or_insert(0) += 1;
            snapshot.last_tool_call.insert(
                agent,
                ToolCallRecord::new(tool_name.clone(), input_summary.clone(), ts),
            );
        }

        (OrchestratorEventKind::Turn, Some(agent)) => {
            *snapshot.turn_count.entry(agent).or_insert(0) += 1;
        }

        (OrchestratorEventKind::Message, Some(agent)) => {
            *snapshot.conversation_length.entry(agent).or_insert(0) += 1;
        }

        (OrchestratorEventKind::Thinking { text }, Some(agent)) => {
            if !text.trim().is_empty() {
                let truncated = truncate_str(text, config.thinking_max_chars);
                tracing::debug!(agent = %agent, thinking = %truncated, "agent thinking");
                snapshot.thinking_text.insert(agent, truncated);
            }
        }

        (OrchestratorEventKind::Error { message }, Some(agent)) => {
            let truncated = truncate_str(message, config.thinking_max_chars);
            tracing::warn!(agent = %agent, error = %truncated, "agent reported error");
            *snapshot.error_count.entry(agent.clone()).or_insert(0) += 1;
            snapshot.last_error.insert(
                agent,
                ErrorRecord {
                    message: truncated,
                    at: ts,
                },
            );
        }

        (OrchestratorEventKind::Transition { from, to }, _) => {
            apply_transition(snapshot, from.clone(), to.clone(), ts, config);
        }

        (OrchestratorEventKind::StageChanged { stage }, _) => {
            apply_stage_change(
                snapshot,
                stage.clone(),
                event.agent_id.clone(),
                ts,
                config,
            );
        }

        // `requires_agent` guarantees an agent for every other kind
        (_, None) => return,
    }

    snapshot.stats.events_applied += 1;
}

fn apply_usage(
    snapshot: &mut Snapshot,
    agent: AgentId,
    (input, output, total): (u64, u64, u64),
    ts: DateTime<Utc>,
    basis: RateBasis,
) {
    let stage_started = *snapshot.timing.stage_started_at.get_or_insert(ts);

    let stage_tokens = snapshot
        .timing
        .stage_tokens
        .entry(agent.clone())
        .or_insert(0);
    *stage_tokens = stage_tokens.saturating_add(total);
    let stage_tokens = *stage_tokens;

    let window_start = match basis {
        RateBasis::Stage => Some(stage_started),
        RateBasis::Agent => snapshot.timing.agent_started_at.get(&agent).copied(),
    };
    let rate = window_start
        .map(|start| tokens_per_second(stage_tokens, ts - start))
        .unwrap_or(0.0);

    let tokens = snapshot.agent_tokens.entry(agent).or_default();
    tokens.add(input, output, total);
    tokens.tokens_per_second = rate;
}

/// Tokens over elapsed seconds. Zero or negative windows yield 0.
pub fn tokens_per_second(tokens: u64, elapsed: TimeDelta) -> f64 {
    let millis = elapsed.num_milliseconds();
    if millis <= 0 {
        0.0
    } else {
        tokens as f64 / (millis as f64 / 1000.0)
    }
}

fn apply_transition(
    snapshot: &mut Snapshot,
    from: Option<AgentId>,
    to: Option<AgentId>,
    ts: DateTime<Utc>,
    config: &AggregatorConfig,
) {
    snapshot.timing.stage_started_at.get_or_insert(ts);

    let previous = from.or_else(|| snapshot.timing.current_agent.clone());
    if let Some(prev) = previous {
        if let Some(started) = snapshot.timing.agent_started_at.remove(&prev) {
            match (ts - started).to_std() {
                Ok(elapsed) => {
                    snapshot
                        .agent_timings
                        .entry(prev)
                        .or_default()
                        .record(elapsed, config.response_sample_capacity);
                }
                Err(_) => {
                    tracing::warn!(agent = %prev, "transition precedes agent start, sample dropped");
                }
            }
        }
    }

    if let Some(next) = &to {
        snapshot.timing.agent_started_at.insert(next.clone(), ts);
    }
    snapshot.timing.current_agent = to;
}

fn apply_stage_change(
    snapshot: &mut Snapshot,
    stage: Option<StageId>,
    agent: Option<AgentId>,
    ts: DateTime<Utc>,
    config: &AggregatorConfig,
) {
    let previous = std::mem::take(&mut snapshot.timing);
    let timings = std::mem::take(&mut snapshot.agent_timings);

    if let Some(old_stage) = previous.stage {
        while snapshot.stage_history.len() >= config.stage_history_capacity.max(1) {
            snapshot.stage_history.pop_front();
        }
        snapshot.stage_history.push_back(StageTimings {
            stage: old_stage,
            started_at: previous.stage_started_at,
            ended_at: ts,
            timings,
        });
    }

    tracing::debug!(stage = ?stage, "stage changed, timing context reset");

    let mut timing = TimingContext {
        stage,
        stage_started_at: Some(ts),
        ..TimingContext::default()
    };
    if let Some(agent) = agent {
        timing.agent_started_at.insert(agent.clone(), ts);
        timing.current_agent = Some(agent);
    }
    snapshot.timing = timing;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn apply(snapshot: &mut Snapshot, event: OrchestratorEvent) {
        update(snapshot, &event, &AggregatorConfig::default());
    }

    #[test]
    fn accepts_matrix() {
        let tagged = OrchestratorEvent::new(at(0), OrchestratorEventKind::Turn).with_task("T1");
        let untagged = OrchestratorEvent::new(at(0), OrchestratorEventKind::Turn);
        let t1 = TaskId::new("T1");
        let t2 = TaskId::new("T2");

        assert!(accepts(None, &tagged));
        assert!(accepts(Some(&t1), &tagged));
        assert!(!accepts(Some(&t2), &tagged));
        assert!(accepts(Some(&t2), &untagged));
    }

    #[test]
    fn tokens_per_second_guards_zero_window() {
        assert_eq!(tokens_per_second(100, TimeDelta::zero()), 0.0);
        assert_eq!(tokens_per_second(100, TimeDelta::seconds(-3)), 0.0);
        assert_eq!(tokens_per_second(100, TimeDelta::seconds(4)), 25.0);
    }

    #[test]
    fn usage_starts_stage_clock_lazily() {
        let mut snapshot = Snapshot::new();
        apply(
            &mut snapshot,
            OrchestratorEvent::new(at(5), OrchestratorEventKind::usage(10, 0, None)).with_agent("a"),
        );

        assert_eq!(snapshot.timing.stage_started_at, Some(at(5)));
        assert_eq!(snapshot.agent_tokens[&AgentId::new("a")].tokens_per_second, 0.0);
    }

    #[test]
    fn agent_rate_basis_uses_agent_timer() {
        let config = AggregatorConfig {
            rate_basis: RateBasis::Agent,
            ..AggregatorConfig::default()
        };
        let mut snapshot = Snapshot::new();
        let events = [
            OrchestratorEvent::new(at(0), OrchestratorEventKind::stage_changed(Some("s".into()))),
            OrchestratorEvent::new(
                at(6),
                OrchestratorEventKind::transition(None, Some("a".into())),
            ),
            OrchestratorEvent::new(at(8), OrchestratorEventKind::usage(0, 40, None)).with_agent("a"),
        ];
        for event in &events {
            update(&mut snapshot, event, &config);
        }

        // 40 tokens over the 2 seconds since `a` took the floor
        assert_eq!(snapshot.agent_tokens[&AgentId::new("a")].tokens_per_second, 20.0);
    }

    #[test]
    fn agent_rate_basis_without_timer_is_zero() {
        let config = AggregatorConfig {
            rate_basis: RateBasis::Agent,
            ..AggregatorConfig::default()
        };
        let mut snapshot = Snapshot::new();
        let event =
            OrchestratorEvent::new(at(3), OrchestratorEventKind::usage(5, 5, None)).with_agent("a");
        update(&mut snapshot, &event, &config);

        let tokens = &snapshot.agent_tokens[&AgentId::new("a")];
        assert_eq!(tokens.total_tokens, 10);
        assert_eq!(tokens.tokens_per_second, 0.0);
    }

    #[test]
    fn negative_transition_delta_records_nothing() {
        let mut snapshot = Snapshot::new();
        apply(
            &mut snapshot,
            OrchestratorEvent::new(at(10), OrchestratorEventKind::transition(None, Some("a".into()))),
        );
        apply(
            &mut snapshot,
            OrchestratorEvent::new(
                at(4),
                OrchestratorEventKind::transition(Some("a".into()), Some("b".into())),
            ),
        );

        assert!(snapshot.agent_timings.get(&AgentId::new("a")).is_none());
        assert_eq!(snapshot.timing.current_agent, Some(AgentId::new("b")));
    }

    #[test]
    fn transition_without_target_clears_current_agent() {
        let mut snapshot = Snapshot::new();
        apply(
            &mut snapshot,
            OrchestratorEvent::new(at(0), OrchestratorEventKind::transition(None, Some("a".into()))),
        );
        apply(
            &mut snapshot,
            OrchestratorEvent::new(at(2), OrchestratorEventKind::transition(None, None)),
        );

        assert!(snapshot.timing.current_agent.is_none());
        assert!(snapshot.timing.agent_started_at.is_empty());
        assert_eq!(
            snapshot.agent_timings[&AgentId::new("a")].last,
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn stage_history_is_bounded() {
        let config = AggregatorConfig {
            stage_history_capacity: 2,
            ..AggregatorConfig::default()
        };
        let mut snapshot = Snapshot::new();
        for (i, name) in ["s1", "s2", "s3", "s4"].iter().enumerate() {
            let event = OrchestratorEvent::new(
                at(i as i64),
                OrchestratorEventKind::stage_changed(Some(StageId::new(*name))),
            );
            update(&mut snapshot, &event, &config);
        }

        let kept: Vec<_> = snapshot
            .stage_history
            .iter()
            .map(|s| s.stage.as_str())
            .collect();
        assert_eq!(kept, vec!["s2", "s3"]);
        assert_eq!(snapshot.timing.stage, Some(StageId::new("s4")));
    }

    #[test]
    fn stage_change_with_agent_starts_its_timer() {
        let mut snapshot = Snapshot::new();
        apply(
            &mut snapshot,
            OrchestratorEvent::new(at(1), OrchestratorEventKind::stage_changed(None)).with_agent("a"),
        );

        assert_eq!(snapshot.timing.current_agent, Some(AgentId::new("a")));
        assert_eq!(
            snapshot.timing.agent_started_at.get(&AgentId::new("a")),
            Some(&at(1))
        );
    }

    #[test]
    fn blank_thinking_keeps_previous_text() {
        let mut snapshot = Snapshot::new();
        apply(
            &mut snapshot,
            OrchestratorEvent::new(at(0), OrchestratorEventKind::thinking("plan".into())).with_agent("a"),
        );
        apply(
            &mut snapshot,
            OrchestratorEvent::new(at(1), OrchestratorEventKind::thinking("  ".into())).with_agent("a"),
        );

        assert_eq!(snapshot.thinking_text[&AgentId::new("a")], "plan");
    }

    #[test]
    fn unattributed_event_only_bumps_counter() {
        let mut snapshot = Snapshot::new();
        apply(
            &mut snapshot,
            OrchestratorEvent::new(at(0), OrchestratorEventKind::Turn),
        );

        assert!(snapshot.turn_count.is_empty());
        assert_eq!(snapshot.stats.events_unattributed, 1);
        assert_eq!(snapshot.stats.events_applied, 0);
    }
}
