//! Run state machine and the values published about a run.
//!
//! `Pending -> Running -> {Succeeded, Failed, Cancelled}`; a run is terminal
//! once it leaves `Running`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::ai::UsageTotals;
use crate::types::{RowResult, RunId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending, Self::Failed | Self::Cancelled) => true,
            (Self::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Immutable progress view handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub status: RunStatus,
    /// Completed batches over total batches, never decreasing while running
    pub progress_fraction: f64,
    pub batches_total: usize,
    pub batches_done: usize,
    pub rows_done: usize,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl RunSnapshot {
    pub fn pending(run_id: RunId) -> Self {
        Self {
            run_id,
            status: RunStatus::Pending,
            progress_fraction: 0.0,
            batches_total: 0,
            batches_done: 0,
            rows_done: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// Timing and batch accounting attached to a terminal run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub elapsed_ms: u64,
    pub sla_target_ms: u64,
    /// Informational only; a slow run still succeeds
    pub sla_met: bool,
    pub rows_per_sec: f64,
    pub workers: usize,
    pub batch_size: usize,
    pub batches_total: usize,
    pub batches_completed: usize,
    pub batches_failed: usize,
    pub batches_synthetic: usize,
    pub rows_total: usize,
    pub rows_analyzed: usize,
    pub rows_errored: usize,
}

impl PerformanceSummary {
    pub fn finalize(&mut self, elapsed: Duration, sla_target: Duration) {
        self.elapsed_ms = elapsed.as_millis() as u64;
        self.sla_target_ms = sla_target.as_millis() as u64;
        self.sla_met = elapsed <= sla_target;
        let secs = elapsed.as_secs_f64();
        let rows = self.rows_analyzed + self.rows_errored;
        self.rows_per_sec = if secs > 0.0 { rows as f64 / secs } else { 0.0 };
    }
}

/// Outcome of one pipeline execution.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: RunId,
    pub status: RunStatus,
    pub progress_fraction: f64,
    /// Ordered by input position; partial when cancelled
    pub results: Vec<RowResult>,
    pub usage: UsageTotals,
    pub performance: PerformanceSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn analyzed(&self) -> impl Iterator<Item = &crate::types::AnalysisRecord> {
        self.results.iter().filter_map(RowResult::as_analyzed)
    }

    pub fn errored(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, RowResult::Error(_)))
            .count()
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Failed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Cancelled));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Pending));
        assert!(!RunStatus::Succeeded.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Cancelled.can_transition_to(RunStatus::Succeeded));
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_performance_sla_flag() {
        let mut perf = PerformanceSummary {
            rows_analyzed: 90,
            rows_errored: 10,
            ..Default::default()
        };
        perf.finalize(Duration::from_secs(4), Duration::from_secs(10));
        assert!(perf.sla_met);
        assert!((perf.rows_per_sec - 25.0).abs() < 1e-9);

        perf.finalize(Duration::from_secs(12), Duration::from_secs(10));
        assert!(!perf.sla_met);
    }

    #[test]
    fn test_snapshot_serializes_elapsed_ms() {
        let mut snapshot = RunSnapshot::pending(RunId::new());
        snapshot.elapsed = Duration::from_millis(1500);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["elapsed"], 1500);
        assert_eq!(json["status"], "pending");
    }
}
