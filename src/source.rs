//! Subscription seam between an event producer and the aggregator.
//!
//! A handler is the sending half of an mpsc channel. The subscriber owns the
//! receiver, so a source never holds a reference to subscriber state and a
//! dropped subscriber cannot be kept alive by a stale handler.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;

use crate::error::SourceError;
use crate::event::RawEvent;

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of an event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(u64);

impl SourceId {
    /// Allocate an identity no other source in this process holds.
    pub fn fresh() -> Self {
        Self(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "src-{}", self.0)
    }
}

/// Handle returned by [`EventSource::subscribe`], scoped to the issuing source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId {
    source: SourceId,
    seq: u64,
}

impl SubscriptionId {
    pub fn new(source: SourceId, seq: u64) -> Self {
        Self { source, seq }
    }

    /// Source that issued this handle.
    pub fn source(&self) -> SourceId {
        self.source
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/sub-{}", self.source, self.seq)
    }
}

/// A producer of named events.
pub trait EventSource {
    /// Identity stamped into every [`SubscriptionId`] this source issues.
    fn source_id(&self) -> SourceId;

    /// Register `sink` as the handler for events called `name`.
    fn subscribe(
        &mut self,
        name: &str,
        sink: mpsc::Sender<RawEvent>,
    ) -> Result<SubscriptionId, SourceError>;

    /// Remove a handler. Returns false if `id` was not registered here.
    fn unsubscribe(&mut self, id: SubscriptionId) -> bool;

    /// Number of handlers currently registered.
    fn handler_count(&self) -> usize;
}

struct Subscription {
    name: String,
    sink: mpsc::Sender<RawEvent>,
}

/// In-process [`EventSource`] that fans each emitted event out to every
/// handler registered for its name.
pub struct LocalEventSource {
    id: SourceId,
    next_seq: u64,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    closed: bool,
}

impl Default for LocalEventSource {
    fn default() -> Self {
        Self {
            id: SourceId::fresh(),
            next_seq: 0,
            subscriptions: BTreeMap::new(),
            closed: false,
        }
    }
}

impl LocalEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every matching handler, stamped with the current time.
    /// Returns the number of handlers reached.
    pub fn emit(&mut self, name: &str, payload: Value) -> usize {
        self.emit_raw(RawEvent::new(name, payload))
    }

    /// Deliver a pre-built event. Handlers whose receiver is gone are pruned.
    pub fn emit_raw(&mut self, event: RawEvent) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for (id, sub) in self.subscriptions.iter().filter(|(_, s)| s.name == event.name) {
            if sub.sink.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }

        for id in dead {
            tracing::debug!(subscription = %id, "pruning handler with dropped receiver");
            self.subscriptions.remove(&id);
        }

        delivered
    }

    /// Refuse further subscriptions. Existing handlers stay until unsubscribed.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl EventSource for LocalEventSource {
    fn source_id(&self) -> SourceId {
        self.id
    }

    fn subscribe(
        &mut self,
        name: &str,
        sink: mpsc::Sender<RawEvent>,
    ) -> Result<SubscriptionId, SourceError> {
        if self.closed {
            return Err(SourceError::Closed);
        }
        let id = SubscriptionId::new(self.id, self.next_seq);
        self.next_seq += 1;
        self.subscriptions.insert(
            id,
            Subscription {
                name: name.to_string(),
                sink,
            },
        );
        Ok(id)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        if id.source() != self.id {
            return false;
        }
        self.subscriptions.remove(&id).is_some()
    }

    fn handler_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl fmt::Debug for LocalEventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalEventSource")
            .field("id", &self.id)
            .field("handlers", &self.subscriptions.len())
            .field("closed", &self.closed)
            .finish()
    }
}
