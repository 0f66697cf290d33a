//! Observable run state

use crate::scheduler::{SchedulerState, StageTrend};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Coarse lifecycle phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Configuration accepted, no virtual users yet
    Initializing,
    /// Target concurrency increasing
    Ramping,
    /// Target concurrency flat
    Steady,
    /// Target concurrency decreasing
    Transitioning,
    /// Stages over (or aborted); remaining workers are draining
    Completing,
    Terminated,
}

impl RunPhase {
    /// Phase implied by the scheduler's state and the current stage's direction
    pub fn from_scheduler(state: SchedulerState, trend: StageTrend) -> Self {
        match state {
            SchedulerState::Idle => RunPhase::Initializing,
            SchedulerState::InStage(_) => match trend {
                StageTrend::Rising => RunPhase::Ramping,
                StageTrend::Flat => RunPhase::Steady,
                StageTrend::Falling => RunPhase::Transitioning,
            },
            SchedulerState::Draining => RunPhase::Completing,
            SchedulerState::Done => RunPhase::Terminated,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Initializing => "initializing",
            RunPhase::Ramping => "ramping",
            RunPhase::Steady => "steady",
            RunPhase::Transitioning => "transitioning",
            RunPhase::Completing => "completing",
            RunPhase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Overall pass/fail outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pending,
    Pass,
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pending => write!(f, "pending"),
            Verdict::Pass => write!(f, "pass"),
            Verdict::Fail => write!(f, "fail"),
        }
    }
}

/// Snapshot published on every controller tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunState {
    pub phase: RunPhase,
    pub target: u64,
    pub live_vus: u64,
    pub stopping_vus: u64,
    pub elapsed: Duration,
    pub verdict: Verdict,
    pub degraded: bool,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            phase: RunPhase::Initializing,
            target: 0,
            live_vus: 0,
            stopping_vus: 0,
            elapsed: Duration::ZERO,
            verdict: Verdict::Pending,
            degraded: false,
        }
    }
}
