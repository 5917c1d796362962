pub mod ids;
pub mod metrics;
pub mod serde_utils;
pub mod snapshot;

pub use ids::{AgentId, StageId, TaskId, ToolName};
pub use metrics::{AgentTiming, AgentTokens, ErrorRecord, ToolCallRecord};
pub use snapshot::{Snapshot, SnapshotStats, StageTimings, TimingContext};
