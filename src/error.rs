//! Error types for orchestrator-telemetry
//!
//! Event handling itself never fails: malformed events are clamped or dropped
//! and counted in `SnapshotStats`. These enums cover the fallible edges only:
//! subscribing to a source, loading configuration, reading event logs.

use crate::source::SourceId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("event source is closed")]
    Closed,
    #[error("aggregator is bound to {expected}, not {actual}")]
    ForeignSource { expected: SourceId, actual: SourceId },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum EventLogError {
    #[error("failed to read event log {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    EventLog(#[from] EventLogError),
}
