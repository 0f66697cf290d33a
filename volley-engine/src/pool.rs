//! Virtual user pool
//!
//! Each virtual user is one tokio task looping over
//! [`WorkloadExecutor::run_once`]. The pool is owned by the run controller
//! and only ever touched from its task, so it needs no locking of its own.
//! Workers are stopped in two steps: a retire flag they check between
//! iterations, then a hard-cancel token once the grace period runs out.

use crate::executor::{IterationOutcome, WorkloadExecutor};
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use volley_config::{PauseConfig, RunConfig};
use volley_metrics::{builtin, TagSet};

/// Bounded wait for hard-cancelled workers before their tasks are aborted
const HARD_CANCEL_WAIT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for workers to exit
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// How virtual users behave and are stopped
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub graceful: bool,
    pub graceful_ramp_down: Duration,
    pub pause: PauseConfig,
    pub max_vus: Option<u64>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings::from(&RunConfig::default())
    }
}

impl From<&RunConfig> for PoolSettings {
    fn from(config: &RunConfig) -> Self {
        Self {
            graceful: config.graceful,
            graceful_ramp_down: config.graceful_ramp_down,
            pause: config.pause,
            max_vus: config.max_vus,
        }
    }
}

/// Iteration totals across every virtual user of the pool
#[derive(Debug, Default)]
pub struct PoolStats {
    iterations: AtomicU64,
    failed: AtomicU64,
    interrupted: AtomicU64,
}

impl PoolStats {
    fn record(&self, outcome: &IterationOutcome) {
        if outcome.interrupted {
            self.interrupted.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.iterations.fetch_add(1, Ordering::Relaxed);
        if outcome.is_failed() {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Iterations that ran to completion, failed or not
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn interrupted(&self) -> u64 {
        self.interrupted.load(Ordering::Relaxed)
    }
}

/// How a drain ended
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Workers that finished their iteration within the grace period
    pub graceful: u64,
    /// Workers that stopped after being hard-cancelled
    pub interrupted: u64,
    /// Workers whose tasks had to be aborted
    pub aborted: u64,
    pub elapsed: Duration,
}

struct Worker {
    retire: watch::Sender<bool>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    retiring_since: Option<Instant>,
}

impl Worker {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    fn is_active(&self) -> bool {
        self.retiring_since.is_none() && self.is_running()
    }
}

/// Owns and resizes the set of running virtual users
pub struct VirtualUserPool {
    executor: WorkloadExecutor,
    settings: PoolSettings,
    workers: BTreeMap<u64, Worker>,
    next_id: u64,
    target: u64,
    peak_live: u64,
    degraded: bool,
    spawn_failures: u64,
    stats: Arc<PoolStats>,
}

impl VirtualUserPool {
    pub fn new(executor: WorkloadExecutor, settings: PoolSettings) -> Self {
        Self {
            executor,
            settings,
            workers: BTreeMap::new(),
            next_id: 1,
            target: 0,
            peak_live: 0,
            degraded: false,
            spawn_failures: 0,
            stats: Arc::new(PoolStats::default()),
        }
    }

    /// Resize the pool towards `target` live virtual users
    ///
    /// Growing revives retiring workers before spawning new ones; shrinking
    /// retires the highest ordinals first. Calling it again with the same
    /// value only reaps finished workers and enforces the ramp-down grace.
    pub fn set_target(&mut self, target: u64) {
        let target = match self.settings.max_vus {
            Some(max_vus) if target > max_vus => {
                warn!(
                    "Requested {} VUs exceeds max_vus {}; clamping",
                    target, max_vus
                );
                max_vus
            }
            _ => target,
        };

        self.reap();
        if target != self.target {
            debug!("VU target {} -> {}", self.target, target);
            self.target = target;
        }

        let mut active = self.live_count();
        if active < target {
            let revivable: Vec<u64> = self
                .workers
                .iter()
                .filter(|(_, worker)| worker.retiring_since.is_some() && worker.is_running())
                .map(|(id, _)| *id)
                .collect();
            for id in revivable {
                if active == target {
                    break;
                }
                if let Some(worker) = self.workers.get_mut(&id) {
                    if !worker.cancel.is_cancelled() {
                        worker.retire.send_replace(false);
                        worker.retiring_since = None;
                        active += 1;
                        debug!("Revived VU {}", id);
                    }
                }
            }

            while active < target {
                if !self.spawn() {
                    break;
                }
                active += 1;
            }
        } else if active > target {
            let excess = (active - target) as usize;
            let retiring: Vec<u64> = self
                .workers
                .iter()
                .rev()
                .filter(|(_, worker)| worker.is_active())
                .take(excess)
                .map(|(id, _)| *id)
                .collect();
            for id in retiring {
                self.retire(id);
            }
        }

        self.enforce_ramp_down_grace();
        self.update_health();
    }

    /// Reap finished workers and hard-cancel those past their grace period
    pub fn maintain(&mut self) {
        self.reap();
        self.enforce_ramp_down_grace();
        self.update_health();
    }

    /// Stop every virtual user
    ///
    /// Workers are retired and given `grace` to finish their iteration, then
    /// hard-cancelled and given a bounded extra wait. Tasks still running
    /// after that are aborted.
    pub async fn drain(&mut self, grace: Duration) -> DrainReport {
        let start = Instant::now();
        self.target = 0;
        let total = self.workers.values().filter(|w| w.is_running()).count() as u64;
        info!("Draining {} virtual users (grace {:?})", total, grace);

        for worker in self.workers.values_mut() {
            worker.retire.send_replace(true);
            worker.retiring_since.get_or_insert(start);
        }

        let mut report = DrainReport::default();
        let remaining = self.wait_for_workers(grace).await;
        report.graceful = total - remaining;

        if remaining > 0 {
            warn!(
                "{} virtual users still running after {:?}; interrupting",
                remaining, grace
            );
            for worker in self.workers.values() {
                worker.cancel.cancel();
            }
            let still_running = self.wait_for_workers(HARD_CANCEL_WAIT).await;
            report.interrupted = remaining - still_running;

            if still_running > 0 {
                warn!("Aborting {} unresponsive virtual users", still_running);
                for worker in self.workers.values() {
                    if worker.is_running() {
                        worker.handle.abort();
                    }
                }
                report.aborted = still_running;
            }
        }

        self.workers.clear();
        self.publish_gauges();
        report.elapsed = start.elapsed();
        info!(
            "Drain finished in {:?}: {} graceful, {} interrupted, {} aborted",
            report.elapsed, report.graceful, report.interrupted, report.aborted
        );
        report
    }

    /// Running virtual users counting towards the target
    pub fn live_count(&self) -> u64 {
        self.workers.values().filter(|w| w.is_active()).count() as u64
    }

    /// Retired virtual users still finishing an iteration
    pub fn stopping_count(&self) -> u64 {
        self.workers
            .values()
            .filter(|w| w.retiring_since.is_some() && w.is_running())
            .count() as u64
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn peak_live(&self) -> u64 {
        self.peak_live
    }

    /// Whether the pool ever had no live workers while some were requested
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn spawn_failures(&self) -> u64 {
        self.spawn_failures
    }

    pub fn stats(&self) -> Arc<PoolStats> {
        Arc::clone(&self.stats)
    }

    fn spawn(&mut self) -> bool {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                self.spawn_failures += 1;
                warn!("Cannot spawn virtual user: {}", e);
                return false;
            }
        };

        let id = self.next_id;
        self.next_id += 1;

        let (retire_tx, retire_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let handle = runtime.spawn(run_virtual_user(
            id,
            self.executor.clone(),
            retire_rx,
            cancel.clone(),
            self.settings.pause,
            Arc::clone(&self.stats),
        ));

        self.workers.insert(
            id,
            Worker {
                retire: retire_tx,
                cancel,
                handle,
                retiring_since: None,
            },
        );
        true
    }

    fn retire(&mut self, id: u64) {
        let graceful = self.settings.graceful;
        if let Some(worker) = self.workers.get_mut(&id) {
            worker.retire.send_replace(true);
            worker.retiring_since = Some(Instant::now());
            if !graceful {
                worker.cancel.cancel();
            }
            debug!("Retiring VU {}", id);
        }
    }

    fn reap(&mut self) {
        self.workers.retain(|_, worker| worker.is_running());
    }

    fn enforce_ramp_down_grace(&mut self) {
        let grace = self.settings.graceful_ramp_down;
        for (id, worker) in &self.workers {
            if let Some(since) = worker.retiring_since {
                if since.elapsed() >= grace && !worker.cancel.is_cancelled() {
                    debug!("VU {} exceeded ramp-down grace; interrupting", id);
                    worker.cancel.cancel();
                }
            }
        }
    }

    fn update_health(&mut self) {
        let live = self.live_count();
        self.peak_live = self.peak_live.max(live);
        if self.target > 0 && live == 0 && !self.degraded {
            warn!(
                "No virtual users running while {} are requested; run is degraded",
                self.target
            );
            self.degraded = true;
        }
        self.publish_gauges();
    }

    fn publish_gauges(&self) {
        let sink = self.executor.sink();
        let tags = TagSet::new();
        sink.set_gauge(builtin::VUS, &tags, self.live_count() as f64);
        sink.set_gauge(builtin::VUS_MAX, &tags, self.peak_live as f64);
    }

    async fn wait_for_workers(&mut self, timeout: Duration) -> u64 {
        let start = Instant::now();
        loop {
            self.reap();
            let running = self.workers.len() as u64;
            if running == 0 || start.elapsed() >= timeout {
                return running;
            }
            let remaining = timeout.saturating_sub(start.elapsed());
            tokio::time::sleep(DRAIN_POLL.min(remaining)).await;
        }
    }
}

impl Drop for VirtualUserPool {
    fn drop(&mut self) {
        for worker in self.workers.values() {
            worker.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for VirtualUserPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualUserPool")
            .field("target", &self.target)
            .field("live", &self.live_count())
            .field("stopping", &self.stopping_count())
            .field("peak_live", &self.peak_live)
            .finish()
    }
}

fn sample_pause(pause: &PauseConfig) -> Duration {
    if pause.max <= pause.min {
        return pause.min;
    }
    let min = pause.min.as_micros() as u64;
    let max = pause.max.as_micros() as u64;
    Duration::from_micros(rand::rng().random_range(min..=max))
}

async fn run_virtual_user(
    id: u64,
    executor: WorkloadExecutor,
    mut retire: watch::Receiver<bool>,
    cancel: CancellationToken,
    pause: PauseConfig,
    stats: Arc<PoolStats>,
) {
    debug!("VU {} started", id);
    let mut iteration = 0;

    loop {
        if *retire.borrow_and_update() || cancel.is_cancelled() {
            break;
        }

        let outcome = executor.run_once(id, iteration, &cancel).await;
        iteration += 1;
        stats.record(&outcome);
        if outcome.interrupted {
            break;
        }

        let pause = sample_pause(&pause);
        if pause.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }

        let retired = tokio::select! {
            _ = tokio::time::sleep(pause) => false,
            _ = cancel.cancelled() => true,
            _ = retire.wait_for(|retired| *retired) => true,
        };
        if retired {
            break;
        }
    }

    debug!("VU {} stopped after {} iterations", id, iteration);
}
