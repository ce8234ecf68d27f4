//! # Vigil Trace
//!
//! Run-scoped trace collection, the live event channel, process-wide
//! counters and trace replay.

pub mod collector;
pub mod metrics;
pub mod replay;
pub mod subscription;

pub use collector::TraceCollector;
pub use metrics::{Counters, MetricsSnapshot, RunMetrics};
pub use replay::{replay, Replay, ReplayStep};
pub use subscription::{EventFilter, EventHub, EventSubscription};
