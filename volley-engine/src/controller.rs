//! Run controller
//!
//! Owns one run end to end: validates configuration, spawns nothing until
//! thresholds compile, then ticks the scheduler, resizes the pool, evaluates
//! thresholds on their own cadence and decides when and how the run ends.

use crate::error::EngineResult;
use crate::executor::WorkloadExecutor;
use crate::pool::{PoolSettings, VirtualUserPool};
use crate::result::{Evaluation, RunResult};
use crate::scheduler::{StageScheduler, Tick};
use crate::state::{RunPhase, RunState, Verdict};
use crate::workload::Workload;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use volley_config::VolleyConfig;
use volley_http::{ClientConfig, HttpClient, ReqwestClient};
use volley_metrics::{builtin, MetricSink, TagSet};
use volley_thresholds::ThresholdEvaluator;

/// Drives a single load run
pub struct RunController {
    config: VolleyConfig,
    evaluator: ThresholdEvaluator,
    workload: Arc<dyn Workload>,
    http: Arc<dyn HttpClient>,
    sink: Arc<MetricSink>,
    cancel: CancellationToken,
    state_tx: watch::Sender<RunState>,
}

impl RunController {
    /// Validate `config`, compile its thresholds and build the HTTP client
    ///
    /// These are the only failures a run can have; once this returns `Ok`,
    /// [`RunController::run`] always produces a [`RunResult`].
    pub fn new<W: Workload>(config: VolleyConfig, workload: W) -> EngineResult<Self> {
        config.validate_all()?;
        let evaluator = ThresholdEvaluator::compile(&config.thresholds)?;
        let http = ReqwestClient::new(ClientConfig::from(config.http.clone()))?;

        let sink = Arc::new(MetricSink::new());
        for (name, kind) in builtin::builtins() {
            sink.declare(name, kind);
        }

        let (state_tx, _) = watch::channel(RunState::default());
        Ok(Self {
            config,
            evaluator,
            workload: Arc::new(workload),
            http: Arc::new(http),
            sink,
            cancel: CancellationToken::new(),
            state_tx,
        })
    }

    /// Replace the HTTP client workloads talk to
    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = http;
        self
    }

    /// Metric sink of this run, for custom metrics or live inspection
    pub fn sink(&self) -> Arc<MetricSink> {
        Arc::clone(&self.sink)
    }

    /// Token that stops the run gracefully when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the run on Ctrl-C
    pub fn cancel_on_ctrl_c(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => {
                        info!("Received Ctrl-C, stopping run");
                        cancel.cancel();
                    }
                    Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
                },
                _ = cancel.cancelled() => {}
            }
        })
    }

    /// Live view of the run state
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    /// Execute the run to completion
    pub async fn run(self) -> RunResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let run_config = &self.config.run;

        info!(
            %run_id,
            "Starting run: {} stages, peak {} VUs, {} thresholds",
            run_config.normalized_stages().len(),
            run_config.peak_target(),
            self.evaluator.thresholds().len()
        );

        let run_tags: TagSet = run_config.tags.clone().into();
        let executor = WorkloadExecutor::new(
            Arc::clone(&self.workload),
            Arc::clone(&self.http),
            Arc::clone(&self.sink),
        )
        .with_tags(run_tags);
        let mut pool = VirtualUserPool::new(executor, PoolSettings::from(run_config));
        let mut scheduler = StageScheduler::new(run_config);
        scheduler.start(start);

        let mut ticker = tokio::time::interval(scheduler.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let evaluation_interval = run_config.evaluation_interval;
        let mut next_evaluation = start + evaluation_interval;

        let mut history = Vec::new();
        let mut abort_reason = None;
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Run cancelled after {:?}", start.elapsed());
                    cancelled = true;
                    break;
                }
                _ = ticker.tick() => {}
            }

            let now = Instant::now();
            let tick = scheduler.tick(now);
            match tick.target {
                Some(target) => pool.set_target(target),
                None => pool.maintain(),
            }
            self.publish(&tick, &pool, scheduler.elapsed(now), Verdict::Pending);

            if now >= next_evaluation {
                while next_evaluation <= now {
                    next_evaluation += evaluation_interval;
                }
                let elapsed = scheduler.elapsed(now);
                let results = self.evaluator.evaluate(&self.sink);
                let trigger = self
                    .evaluator
                    .abort_trigger(&results, elapsed)
                    .map(|result| format!("{}: {}", result.metric, result.expression));
                history.push(Evaluation { elapsed, results });

                if let Some(reason) = trigger {
                    warn!("Threshold '{}' failed; aborting run at {:?}", reason, elapsed);
                    abort_reason = Some(reason);
                    break;
                }
            }

            if tick.stages_complete() {
                break;
            }
        }

        scheduler.force_drain(Instant::now());
        let draining = scheduler.tick(Instant::now());
        self.publish(&draining, &pool, scheduler.elapsed(Instant::now()), Verdict::Pending);

        let drain = pool.drain(scheduler.graceful_stop()).await;
        let finished = Instant::now();
        scheduler.finish(finished);

        let elapsed = scheduler.elapsed(finished);
        let final_results = self.evaluator.evaluate(&self.sink);
        history.push(Evaluation {
            elapsed,
            results: final_results.clone(),
        });

        let verdict = if abort_reason.is_none() && final_results.iter().all(|r| r.passed) {
            Verdict::Pass
        } else {
            Verdict::Fail
        };

        let stats = pool.stats();
        let final_state = RunState {
            phase: RunPhase::Terminated,
            target: 0,
            live_vus: 0,
            stopping_vus: 0,
            elapsed,
            verdict,
            degraded: pool.is_degraded(),
        };
        self.state_tx.send_replace(final_state.clone());

        for failed in final_results.iter().filter(|r| !r.passed) {
            warn!(
                "Threshold failed: {} {} (observed {:?})",
                failed.metric, failed.expression, failed.observed
            );
        }
        info!(
            %run_id,
            "Run finished in {:?}: verdict {}, {} iterations, peak {} VUs",
            elapsed,
            verdict,
            stats.iterations(),
            pool.peak_live()
        );

        RunResult {
            run_id,
            started_at,
            finished_at: Utc::now(),
            verdict,
            abort_reason,
            cancelled,
            degraded: pool.is_degraded(),
            history,
            final_results,
            metrics: self.sink.snapshot_all(),
            peak_vus: pool.peak_live(),
            total_iterations: stats.iterations(),
            interrupted_iterations: stats.interrupted(),
            timeline: scheduler.timeline().to_vec(),
            drain,
            final_state,
        }
    }

    fn publish(&self, tick: &Tick, pool: &VirtualUserPool, elapsed: Duration, verdict: Verdict) {
        let state = RunState {
            phase: RunPhase::from_scheduler(tick.state, tick.trend),
            target: tick.target.unwrap_or(0),
            live_vus: pool.live_count(),
            stopping_vus: pool.stopping_count(),
            elapsed,
            verdict,
            degraded: pool.is_degraded(),
        };

        let previous = self.state_tx.borrow().phase;
        if previous != state.phase {
            info!("Run phase {} -> {} at {:?}", previous, state.phase, elapsed);
        }
        self.state_tx.send_replace(state);
    }
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("stages", &self.config.run.normalized_stages().len())
            .field("thresholds", &self.evaluator.thresholds().len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::scheduler::SchedulerState;
    use crate::workload::workload_fn;
    use volley_config::{PauseConfig, RunConfig, ThresholdConfig};
    use volley_http::MockHttpClient;

    fn quick_config(thresholds: Vec<ThresholdConfig>) -> VolleyConfig {
        VolleyConfig {
            run: RunConfig {
                pause: PauseConfig::fixed(Duration::from_millis(100)),
                ..RunConfig::flat(2, Duration::from_secs(5))
            },
            thresholds,
            ..VolleyConfig::default()
        }
    }

    fn noop() -> impl Workload {
        workload_fn(|ctx| async move {
            ctx.sleep(Duration::from_millis(10)).await;
            Ok(())
        })
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let err = RunController::new(VolleyConfig::default(), noop()).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));

        let err = RunController::new(
            quick_config(vec![ThresholdConfig::new("http_req_duration", "p95<500")]),
            noop(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Threshold(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flat_run_passes() {
        let controller = RunController::new(
            quick_config(vec![ThresholdConfig::new("iteration_duration", "p(95)<50")]),
            noop(),
        )
        .unwrap()
        .with_http_client(Arc::new(MockHttpClient::new()));
        let states = controller.subscribe();

        let result = controller.run().await;
        assert_eq!(result.verdict, Verdict::Pass);
        assert!(!result.cancelled);
        assert!(!result.degraded);
        assert_eq!(result.peak_vus, 2);
        assert!(result.total_iterations > 50);
        assert_eq!(result.interrupted_iterations, 0);
        assert!(result.history.len() >= 5);
        assert_eq!(states.borrow().phase, RunPhase::Terminated);
        assert_eq!(states.borrow().verdict, Verdict::Pass);
        assert_eq!(
            result.timeline.last().map(|s| s.state),
            Some(SchedulerState::Done)
        );
        assert!(result.metric("iterations").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_not_a_failure() {
        let controller = RunController::new(
            VolleyConfig {
                run: RunConfig::flat(3, Duration::from_secs(600)),
                ..VolleyConfig::default()
            },
            noop(),
        )
        .unwrap()
        .with_http_client(Arc::new(MockHttpClient::new()));

        let cancel = controller.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        });

        let result = controller.run().await;
        assert!(result.cancelled);
        assert!(!result.aborted());
        assert_eq!(result.verdict, Verdict::Pass);
        assert!(result.final_state.elapsed < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_slow_run_keeps_iteration_failed_clean() {
        let controller = RunController::new(
            VolleyConfig {
                run: RunConfig {
                    graceful_stop: Duration::from_secs(1),
                    ..RunConfig::flat(2, Duration::from_secs(600))
                },
                thresholds: vec![ThresholdConfig::new("iteration_failed", "rate<0.5")],
                ..VolleyConfig::default()
            },
            workload_fn(|ctx| async move {
                ctx.sleep(Duration::from_secs(60)).await;
                Ok(())
            }),
        )
        .unwrap()
        .with_http_client(Arc::new(MockHttpClient::new()));

        let cancel = controller.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        });

        let result = controller.run().await;
        assert!(result.cancelled);
        assert_eq!(result.interrupted_iterations, 2);
        assert_eq!(result.total_iterations, 0);
        assert_eq!(result.drain.interrupted, 2);
        assert!(result.final_results[0].passed);
        assert_eq!(result.final_results[0].samples, 0);
        assert_eq!(result.verdict, Verdict::Pass);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_threshold_fails_verdict() {
        let controller = RunController::new(
            quick_config(vec![ThresholdConfig::new("iterations", "count<5")]),
            noop(),
        )
        .unwrap()
        .with_http_client(Arc::new(MockHttpClient::new()));

        let result = controller.run().await;
        assert!(!result.aborted());
        assert_eq!(result.verdict, Verdict::Fail);
        assert_eq!(result.failed_thresholds().count(), 1);
    }
}
