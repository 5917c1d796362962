//! Per-agent telemetry aggregated from named orchestrator events.
//!
//! An [`EventAggregator`] subscribes to an [`EventSource`], decodes each raw
//! event defensively and folds it into a [`Snapshot`] through the pure
//! [`aggregator::update`] reducer.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod source;

pub use aggregator::EventAggregator;
pub use config::{AggregatorConfig, RateBasis};
pub use error::TelemetryError;
pub use event::{OrchestratorEvent, OrchestratorEventKind, RawEvent};
pub use model::Snapshot;
pub use source::{EventSource, LocalEventSource, SourceId, SubscriptionId};
