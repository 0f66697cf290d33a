//! Run result

use crate::pool::DrainReport;
use crate::scheduler::StateSpan;
use crate::state::{RunState, Verdict};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;
use volley_metrics::MetricSummary;
use volley_thresholds::ThresholdResult;

/// Threshold results from one periodic evaluation
#[derive(Debug, Clone, Serialize)]
pub struct Evaluation {
    /// Offset from the start of the run
    pub elapsed: Duration,
    pub results: Vec<ThresholdResult>,
}

impl Evaluation {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

/// Everything known about a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub verdict: Verdict,
    /// Threshold that ended the run early, e.g. `http_req_failed: rate<0.1`
    pub abort_reason: Option<String>,
    /// The run was stopped through its cancellation token
    pub cancelled: bool,
    pub degraded: bool,
    pub history: Vec<Evaluation>,
    pub final_results: Vec<ThresholdResult>,
    pub metrics: Vec<MetricSummary>,
    pub peak_vus: u64,
    /// Iterations that ran to completion
    pub total_iterations: u64,
    /// Iterations cut short by hard cancellation, not part of `total_iterations`
    pub interrupted_iterations: u64,
    pub timeline: Vec<StateSpan>,
    pub drain: DrainReport,
    pub final_state: RunState,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    pub fn aborted(&self) -> bool {
        self.abort_reason.is_some()
    }

    /// Thresholds that failed at the final evaluation
    pub fn failed_thresholds(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.final_results.iter().filter(|r| !r.passed)
    }

    pub fn metric(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at).to_std().unwrap_or_default()
    }
}
