//! Stage scheduler
//!
//! Turns elapsed run time into a target concurrency. The target is a pure
//! function of the stage list so it can be tested without a clock; the
//! scheduler itself only tracks which state the run is in and for how long.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;
use volley_config::{RunConfig, StageConfig};

/// Where the scheduler is in the load profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    /// Index into the configured stages
    InStage(usize),
    Draining,
    Done,
}

/// Direction of a stage's target over its duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageTrend {
    Rising,
    Flat,
    Falling,
}

/// Time spent in one scheduler state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSpan {
    pub state: SchedulerState,
    /// Offset from the start of the run
    pub entered_at: Duration,
    pub duration: Duration,
}

/// Target concurrency `elapsed` into the profile
///
/// Each stage interpolates linearly from the previous stage's target (or
/// `start_vus` for the first one) to its own. Zero-duration stages are
/// skipped, making their target the start of the next stage. Returns the
/// stage index alongside the target, or `None` once every stage is over.
pub fn target_at(stages: &[StageConfig], start_vus: u64, elapsed: Duration) -> Option<(usize, u64)> {
    let mut from = start_vus;
    let mut stage_start = Duration::ZERO;

    for (index, stage) in stages.iter().enumerate() {
        let stage_end = stage_start + stage.duration;
        if !stage.duration.is_zero() && elapsed < stage_end {
            if from == stage.target {
                return Some((index, from));
            }
            let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
            let target = from as f64 + (stage.target as f64 - from as f64) * progress;
            return Some((index, target.round() as u64));
        }
        from = stage.target;
        stage_start = stage_end;
    }

    None
}

/// Whether stage `index` ramps up, holds or ramps down
pub fn stage_trend(stages: &[StageConfig], start_vus: u64, index: usize) -> StageTrend {
    let from = match index {
        0 => start_vus,
        _ => stages.get(index - 1).map_or(start_vus, |s| s.target),
    };
    match stages.get(index).map(|s| s.target.cmp(&from)) {
        Some(std::cmp::Ordering::Greater) => StageTrend::Rising,
        Some(std::cmp::Ordering::Less) => StageTrend::Falling,
        _ => StageTrend::Flat,
    }
}

/// Result of one scheduler tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub state: SchedulerState,
    /// Concurrency to apply, `None` once stages are over
    pub target: Option<u64>,
    pub trend: StageTrend,
}

impl Tick {
    /// The final stage has completed on this tick or earlier
    pub fn stages_complete(&self) -> bool {
        matches!(self.state, SchedulerState::Draining | SchedulerState::Done)
    }
}

/// Drives the state machine `Idle -> InStage(i) -> Draining -> Done`
#[derive(Debug, Clone)]
pub struct StageScheduler {
    stages: Vec<StageConfig>,
    start_vus: u64,
    tick_interval: Duration,
    graceful_stop: Duration,
    state: SchedulerState,
    started: Option<Instant>,
    timeline: Vec<StateSpan>,
}

impl StageScheduler {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            stages: config.normalized_stages(),
            start_vus: config.initial_vus(),
            tick_interval: config.tick_interval,
            graceful_stop: config.graceful_stop,
            state: SchedulerState::Idle,
            started: None,
            timeline: Vec::new(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// How long the final drain may wait before interrupting iterations
    pub fn graceful_stop(&self) -> Duration {
        self.graceful_stop
    }

    pub fn stages(&self) -> &[StageConfig] {
        &self.stages
    }

    /// Sum of all stage durations
    pub fn planned_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// Time since [`StageScheduler::start`], zero before it
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.started
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default()
    }

    /// Begin the profile at `now`
    pub fn start(&mut self, now: Instant) {
        if self.state != SchedulerState::Idle {
            return;
        }
        self.started = Some(now);
        self.timeline.push(StateSpan {
            state: SchedulerState::Idle,
            entered_at: Duration::ZERO,
            duration: Duration::ZERO,
        });
        info!(
            "Starting load profile: {} stages over {:?}",
            self.stages.len(),
            self.planned_duration()
        );
    }

    /// Recompute the target for `now`, advancing the state machine
    pub fn tick(&mut self, now: Instant) -> Tick {
        if self.started.is_none() {
            self.start(now);
        }

        if matches!(self.state, SchedulerState::Idle | SchedulerState::InStage(_)) {
            let elapsed = self.elapsed(now);
            match target_at(&self.stages, self.start_vus, elapsed) {
                Some((index, target)) => {
                    if self.state != SchedulerState::InStage(index) {
                        self.transition(SchedulerState::InStage(index), now);
                    }
                    return Tick {
                        state: self.state,
                        target: Some(target),
                        trend: stage_trend(&self.stages, self.start_vus, index),
                    };
                }
                None => {
                    info!("All stages complete after {:?}", elapsed);
                    self.transition(SchedulerState::Draining, now);
                }
            }
        }

        Tick {
            state: self.state,
            target: None,
            trend: StageTrend::Falling,
        }
    }

    /// Stop following the profile and enter Draining now
    pub fn force_drain(&mut self, now: Instant) {
        if self.started.is_none() {
            self.start(now);
        }
        if matches!(self.state, SchedulerState::Idle | SchedulerState::InStage(_)) {
            info!("Draining early at {:?}", self.elapsed(now));
            self.transition(SchedulerState::Draining, now);
        }
    }

    /// Mark the drain as finished
    pub fn finish(&mut self, now: Instant) {
        if self.state != SchedulerState::Done {
            self.force_drain(now);
            self.transition(SchedulerState::Done, now);
        }
    }

    /// States visited so far with the time spent in each
    pub fn timeline(&self) -> &[StateSpan] {
        &self.timeline
    }

    fn transition(&mut self, next: SchedulerState, now: Instant) {
        let elapsed = self.elapsed(now);
        if let Some(current) = self.timeline.last_mut() {
            current.duration = elapsed.saturating_sub(current.entered_at);
        }
        self.timeline.push(StateSpan {
            state: next,
            entered_at: elapsed,
            duration: Duration::ZERO,
        });
        self.state = next;
    }
}
