//! Run counters.
//!
//! [`Counters`] is the only state shared across runs; every field only ever
//! increases.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use vigil_core::{AgentStatus, ExecutionTrace, RunStatus};

/// Process-wide monotonic counters.
#[derive(Debug, Default)]
pub struct Counters {
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    runs_recovered: AtomicU64,
    runs_unresolved: AtomicU64,
    runs_cancelled: AtomicU64,
    agents_succeeded: AtomicU64,
    agents_failed: AtomicU64,
    agents_skipped: AtomicU64,
    agents_timed_out: AtomicU64,
    replans: AtomicU64,
    total_latency_ms: AtomicU64,
}

/// Point-in-time copy of [`Counters`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_recovered: u64,
    pub runs_unresolved: u64,
    pub runs_cancelled: u64,
    pub agents_succeeded: u64,
    pub agents_failed: u64,
    pub agents_skipped: u64,
    pub agents_timed_out: u64,
    pub replans: u64,
    pub total_latency_ms: u64,
    pub avg_latency_ms: f64,
}

impl Counters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_agent(&self, status: AgentStatus) {
        let counter = match status {
            AgentStatus::Success => &self.agents_succeeded,
            AgentStatus::Failure => &self.agents_failed,
            AgentStatus::Skipped => &self.agents_skipped,
            AgentStatus::Timeout => &self.agents_timed_out,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replan(&self) {
        self.replans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_finished(&self, status: RunStatus, latency_ms: u64) {
        let counter = match status {
            RunStatus::Completed | RunStatus::Partial => &self.runs_completed,
            RunStatus::Recovered => &self.runs_recovered,
            RunStatus::PlannerNoSolution | RunStatus::ReplanLimitExceeded => &self.runs_unresolved,
            RunStatus::Cancelled => &self.runs_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    /// Copy the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let runs_completed = load(&self.runs_completed);
        let runs_recovered = load(&self.runs_recovered);
        let runs_unresolved = load(&self.runs_unresolved);
        let runs_cancelled = load(&self.runs_cancelled);
        let total_latency_ms = load(&self.total_latency_ms);
        let finished = runs_completed + runs_recovered + runs_unresolved + runs_cancelled;

        MetricsSnapshot {
            runs_started: load(&self.runs_started),
            runs_completed,
            runs_recovered,
            runs_unresolved,
            runs_cancelled,
            agents_succeeded: load(&self.agents_succeeded),
            agents_failed: load(&self.agents_failed),
            agents_skipped: load(&self.agents_skipped),
            agents_timed_out: load(&self.agents_timed_out),
            replans: load(&self.replans),
            total_latency_ms,
            avg_latency_ms: if finished == 0 {
                0.0
            } else {
                total_latency_ms as f64 / finished as f64
            },
        }
    }
}

/// Summary of a single finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub latency_ms: u64,
    pub successes: usize,
    pub failures: usize,
    pub skipped: usize,
    pub timeouts: usize,
    pub replans: u32,
}

impl RunMetrics {
    /// Summarize a trace.
    pub fn from_trace(trace: &ExecutionTrace) -> Self {
        let count = |status: AgentStatus| trace.agents.iter().filter(|r| r.status == status).count();
        Self {
            latency_ms: trace.duration_ms(),
            successes: count(AgentStatus::Success),
            failures: count(AgentStatus::Failure),
            skipped: count(AgentStatus::Skipped),
            timeouts: count(AgentStatus::Timeout),
            replans: trace.replans,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = Counters::new();
        counters.record_run_started();
        counters.record_run_started();
        counters.record_agent(AgentStatus::Success);
        counters.record_agent(AgentStatus::Timeout);
        counters.record_replan();
        counters.record_run_finished(RunStatus::Recovered, 120);
        counters.record_run_finished(RunStatus::ReplanLimitExceeded, 80);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.runs_started, 2);
        assert_eq!(snapshot.runs_recovered, 1);
        assert_eq!(snapshot.runs_unresolved, 1);
        assert_eq!(snapshot.agents_succeeded, 1);
        assert_eq!(snapshot.agents_timed_out, 1);
        assert_eq!(snapshot.replans, 1);
        assert_eq!(snapshot.avg_latency_ms, 100.0);
    }

    #[test]
    fn test_empty_snapshot() {
        assert_eq!(Counters::new().snapshot(), MetricsSnapshot::default());
    }
}
