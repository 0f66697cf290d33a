//! Single-iteration execution

use crate::workload::{IterationContext, Workload};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use volley_http::HttpClient;
use volley_metrics::{builtin, MetricSink, TagSet};

/// Error text of an iteration cut short by hard cancellation
pub const INTERRUPTED: &str = "interrupted";

/// What happened during one iteration
#[derive(Debug, Clone, PartialEq)]
pub struct IterationOutcome {
    pub vu_id: u64,
    pub iteration: u64,
    pub duration: Duration,
    pub error: Option<String>,
    pub checks: Vec<(String, bool)>,
    pub interrupted: bool,
}

impl IterationOutcome {
    /// The workload itself failed; interruption does not count
    pub fn is_failed(&self) -> bool {
        self.error.is_some() && !self.interrupted
    }
}

/// Runs workload iterations and records their built-in metrics
#[derive(Clone)]
pub struct WorkloadExecutor {
    workload: Arc<dyn Workload>,
    http: Arc<dyn HttpClient>,
    sink: Arc<MetricSink>,
    tags: TagSet,
}

impl WorkloadExecutor {
    pub fn new(
        workload: Arc<dyn Workload>,
        http: Arc<dyn HttpClient>,
        sink: Arc<MetricSink>,
    ) -> Self {
        Self {
            workload,
            http,
            sink,
            tags: TagSet::new(),
        }
    }

    /// Tags added to every sample recorded through this executor
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    pub fn sink(&self) -> &Arc<MetricSink> {
        &self.sink
    }

    /// Execute one iteration
    ///
    /// Never fails: workload errors, panics and interruption by `interrupt`
    /// all end up in the returned outcome, and the iteration metrics are
    /// recorded before returning.
    pub async fn run_once(
        &self,
        vu_id: u64,
        iteration: u64,
        interrupt: &CancellationToken,
    ) -> IterationOutcome {
        let ctx = IterationContext::new(
            vu_id,
            iteration,
            Arc::clone(&self.http),
            Arc::clone(&self.sink),
            self.tags.clone(),
        );
        let start = Instant::now();

        let run = AssertUnwindSafe(self.workload.run(ctx.clone())).catch_unwind();
        let (error, interrupted) = tokio::select! {
            biased;
            _ = interrupt.cancelled() => (Some(INTERRUPTED.to_string()), true),
            result = run => match result {
                Ok(Ok(())) => (None, false),
                Ok(Err(e)) => (Some(format!("{:#}", e)), false),
                Err(panic) => (Some(format!("panic: {}", panic_message(panic.as_ref()))), false),
            },
        };

        let outcome = IterationOutcome {
            vu_id,
            iteration,
            duration: start.elapsed(),
            error,
            checks: ctx.take_checks(),
            interrupted,
        };

        if let Some(error) = &outcome.error {
            debug!("VU {} iteration {} failed: {}", vu_id, iteration, error);
        }
        self.record(&outcome);
        outcome
    }

    fn record(&self, outcome: &IterationOutcome) {
        if outcome.interrupted {
            self.sink
                .add_counter(builtin::ITERATIONS_INTERRUPTED, &self.tags, 1.0);
        } else {
            self.sink.add_counter(builtin::ITERATIONS, &self.tags, 1.0);
            self.sink.add_trend(
                builtin::ITERATION_DURATION,
                &self.tags,
                outcome.duration.as_secs_f64() * 1000.0,
            );
            self.sink
                .add_rate(builtin::ITERATION_FAILED, &self.tags, outcome.is_failed());
        }

        for (name, passed) in &outcome.checks {
            let tags = self.tags.merged(&TagSet::new().with("check", name.as_str()));
            self.sink.add_rate(builtin::CHECKS, &tags, *passed);
        }
    }
}

impl std::fmt::Debug for WorkloadExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadExecutor")
            .field("tags", &self.tags)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
