pub mod update;

pub use update::{accepts, resolve_agent, tokens_per_second, update};

use std::sync::mpsc;

use crate::config::AggregatorConfig;
use crate::error::TelemetryError;
use crate::event::{decode_event, RawEvent, SUBSCRIBED_EVENTS};
use crate::model::{Snapshot, TaskId};
use crate::error::SourceError;
use crate::source::{EventSource, SourceId, SubscriptionId};

/// Decode, filter and fold one raw event.
/// Returns true when the event passed decoding and the task filter.
fn apply_raw(
    snapshot: &mut Snapshot,
    raw: &RawEvent,
    filter: Option<&TaskId>,
    config: &AggregatorConfig,
) -> bool {
    let Some(event) = decode_event(raw) else {
        tracing::trace!(name = %raw.name, "unhandled event name");
        snapshot.stats.events_unknown += 1;
        return false;
    };

    if !accepts(filter, &event) {
        tracing::trace!(name = %raw.name, task = ?event.task_id, "task filter mismatch");
        snapshot.stats.events_filtered += 1;
        return false;
    }

    update(snapshot, &event, config);
    true
}

/// Fold a recorded event sequence into a fresh snapshot, no source needed.
pub fn replay<I>(events: I, filter: Option<&TaskId>, config: &AggregatorConfig) -> Snapshot
where
    I: IntoIterator<Item = RawEvent>,
{
    let mut snapshot = Snapshot::new();
    for raw in events {
        apply_raw(&mut snapshot, &raw, filter, config);
    }
    snapshot
}

/// Subscribes to an [`EventSource`] and keeps a [`Snapshot`] current.
///
/// Lifecycle: `activate` registers one handler per name in
/// [`SUBSCRIBED_EVENTS`] and starts a fresh snapshot; `pump` (or `dispatch`)
/// applies events; `deactivate` removes every handler. After deactivation the
/// snapshot stays readable but never changes again. While active the
/// aggregator is bound to one source and refuses to activate on, or
/// deactivate from, any other.
///
/// Dropping an active aggregator without calling `deactivate` drops its
/// inbox, so the source prunes the dead handlers the next time it emits.
#[derive(Debug)]
pub struct EventAggregator {
    config: AggregatorConfig,
    task_filter: Option<TaskId>,
    snapshot: Snapshot,
    subscriptions: Vec<SubscriptionId>,
    bound_source: Option<SourceId>,
    inbox: Option<mpsc::Receiver<RawEvent>>,
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}

impl EventAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            task_filter: None,
            snapshot: Snapshot::new(),
            subscriptions: Vec::new(),
            bound_source: None,
            inbox: None,
        }
    }

    pub fn with_task_filter(mut self, task_id: impl Into<TaskId>) -> Self {
        self.task_filter = Some(task_id.into());
        self
    }

    /// Change the filter. Applies to events processed from now on.
    pub fn set_task_filter(&mut self, task_id: Option<TaskId>) {
        self.task_filter = task_id;
    }

    pub fn task_filter(&self) -> Option<&TaskId> {
        self.task_filter.as_ref()
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.inbox.is_some()
    }

    /// Number of handlers this aggregator has registered with its source.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Source this aggregator is subscribed to, while active.
    pub fn bound_source(&self) -> Option<SourceId> {
        self.bound_source
    }

    fn check_bound<S>(&self, source: &S) -> Result<(), SourceError>
    where
        S: EventSource + ?Sized,
    {
        match self.bound_source {
            Some(expected) if expected != source.source_id() => Err(SourceError::ForeignSource {
                expected,
                actual: source.source_id(),
            }),
            _ => Ok(()),
        }
    }

    /// Register handlers on `source` and start a fresh snapshot.
    ///
    /// No-op when already active on `source`; an error when active on another
    /// one. On failure, every handler registered so far is removed again
    /// before the error is returned.
    pub fn activate<S>(&mut self, source: &mut S) -> Result<(), TelemetryError>
    where
        S: EventSource + ?Sized,
    {
        if self.is_active() {
            self.check_bound(source)?;
            tracing::debug!("aggregator already active");
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();
        let mut registered = Vec::with_capacity(SUBSCRIBED_EVENTS.len());

        for name in SUBSCRIBED_EVENTS {
            match source.subscribe(name, tx.clone()) {
                Ok(id) => registered.push(id),
                Err(e) => {
                    for id in registered {
                        source.unsubscribe(id);
                    }
                    tracing::warn!(error = %e, event = name, "subscription failed");
                    return Err(e.into());
                }
            }
        }

        self.subscriptions = registered;
        self.bound_source = Some(source.source_id());
        self.inbox = Some(rx);
        self.snapshot = Snapshot::new();

        tracing::info!(
            handlers = self.subscriptions.len(),
            task_filter = ?self.task_filter,
            "telemetry aggregator activated"
        );
        Ok(())
    }

    /// Remove every handler from `source`. Events still queued are discarded.
    ///
    /// `source` must be the one passed to `activate`; otherwise nothing is
    /// touched and the aggregator stays active.
    pub fn deactivate<S>(&mut self, source: &mut S) -> Result<(), TelemetryError>
    where
        S: EventSource + ?Sized,
    {
        if !self.is_active() {
            return Ok(());
        }
        self.check_bound(source)?;

        for id in self.subscriptions.drain(..) {
            if !source.unsubscribe(id) {
                tracing::debug!(subscription = %id, "handler already gone");
            }
        }
        self.inbox = None;
        self.bound_source = None;

        tracing::info!(
            applied = self.snapshot.stats.events_applied,
            "telemetry aggregator deactivated"
        );
        Ok(())
    }

    /// Apply every queued event in arrival order. Never blocks.
    /// Returns the number of events drained from the inbox.
    pub fn pump(&mut self) -> usize {
        let mut drained = 0;
        loop {
            let next = match &self.inbox {
                Some(inbox) => inbox.try_recv().ok(),
                None => None,
            };
            let Some(raw) = next else { break };
            apply_raw(
                &mut self.snapshot,
                &raw,
                self.task_filter.as_ref(),
                &self.config,
            );
            drained += 1;
        }
        drained
    }

    /// Apply one event immediately, bypassing the inbox.
    ///
    /// For hosts that deliver events from their own callbacks. Returns false
    /// when inactive, or when the event is unknown or filtered out.
    pub fn dispatch(&mut self, raw: &RawEvent) -> bool {
        if !self.is_active() {
            return false;
        }
        apply_raw(
            &mut self.snapshot,
            raw,
            self.task_filter.as_ref(),
            &self.config,
        )
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.snapshot
    }
}
