//! Load profile configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_range, Validatable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Load profile and virtual user behaviour for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Ordered ramping stages. Mutually exclusive with `duration`.
    #[serde(default)]
    pub stages: Vec<StageConfig>,

    /// Constant concurrency for a flat run (used with `duration`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vus: Option<u64>,

    /// Length of a flat run (used with `vus`)
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration: Option<Duration>,

    /// Concurrency the first stage ramps from
    #[serde(default)]
    pub start_vus: u64,

    /// Hard cap on concurrently live virtual users
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_vus: Option<u64>,

    /// How often the scheduler recomputes and applies target concurrency
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,

    /// How often thresholds are evaluated against the metric sink
    #[serde(with = "humantime_serde", default = "default_evaluation_interval")]
    pub evaluation_interval: Duration,

    /// Let retiring virtual users finish their in-flight iteration
    #[serde(default = "crate::domains::utils::default_true")]
    pub graceful: bool,

    /// Time a retiring virtual user gets to finish before it is interrupted
    #[serde(with = "humantime_serde", default = "default_graceful_ramp_down")]
    pub graceful_ramp_down: Duration,

    /// Time the final drain waits before interrupting remaining iterations
    #[serde(with = "humantime_serde", default = "default_graceful_stop")]
    pub graceful_stop: Duration,

    /// Pause between iterations of one virtual user
    #[serde(default)]
    pub pause: PauseConfig,

    /// Tags attached to every sample recorded during the run
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// One segment of the load profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// How long the stage lasts
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Concurrency reached at the end of the stage
    pub target: u64,
}

impl StageConfig {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Inter-iteration pause, drawn uniformly from `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PauseConfig {
    #[serde(with = "humantime_serde", default = "default_pause")]
    pub min: Duration,

    #[serde(with = "humantime_serde", default = "default_pause")]
    pub max: Duration,
}

impl PauseConfig {
    /// A fixed pause
    pub fn fixed(pause: Duration) -> Self {
        Self {
            min: pause,
            max: pause,
        }
    }

    /// A jittered pause
    pub fn between(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// No pause at all
    pub fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }
}

impl Default for PauseConfig {
    fn default() -> Self {
        Self::fixed(default_pause())
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            vus: None,
            duration: None,
            start_vus: 0,
            max_vus: None,
            tick_interval: default_tick_interval(),
            evaluation_interval: default_evaluation_interval(),
            graceful: true,
            graceful_ramp_down: default_graceful_ramp_down(),
            graceful_stop: default_graceful_stop(),
            pause: PauseConfig::default(),
            tags: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    /// A run driven by explicit stages
    pub fn staged(stages: Vec<StageConfig>) -> Self {
        Self {
            stages,
            ..Self::default()
        }
    }

    /// A run holding `vus` virtual users for `duration`
    pub fn flat(vus: u64, duration: Duration) -> Self {
        Self {
            vus: Some(vus),
            duration: Some(duration),
            ..Self::default()
        }
    }

    /// Stages with the flat `(vus, duration)` form expanded into one stage
    pub fn normalized_stages(&self) -> Vec<StageConfig> {
        match (self.stages.is_empty(), self.vus, self.duration) {
            (true, Some(vus), Some(duration)) => vec![StageConfig::new(duration, vus)],
            _ => self.stages.clone(),
        }
    }

    /// Concurrency at the start of the first stage
    pub fn initial_vus(&self) -> u64 {
        match (self.stages.is_empty(), self.vus) {
            (true, Some(vus)) => vus,
            _ => self.start_vus,
        }
    }

    /// Sum of all stage durations
    pub fn total_duration(&self) -> Duration {
        self.normalized_stages().iter().map(|s| s.duration).sum()
    }

    /// Highest concurrency the profile asks for
    pub fn peak_target(&self) -> u64 {
        self.normalized_stages()
            .iter()
            .map(|s| s.target)
            .chain(std::iter::once(self.initial_vus()))
            .max()
            .unwrap_or(0)
    }
}

impl Validatable for RunConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !self.stages.is_empty() && self.duration.is_some() {
            return Err(self.validation_error(
                "stages and duration are mutually exclusive; use one load profile",
            ));
        }

        if self.stages.is_empty() {
            match (self.vus, self.duration) {
                (Some(vus), Some(duration)) => {
                    validate_positive(vus, "vus", self.domain_name())?;
                    validate_positive(duration.as_millis(), "duration", self.domain_name())?;
                }
                _ => {
                    return Err(self.validation_error(
                        "no load profile: set stages, or both vus and duration",
                    ))
                }
            }
        }

        validate_positive(
            self.total_duration().as_millis(),
            "total stage duration",
            self.domain_name(),
        )?;

        validate_positive(
            self.tick_interval.as_millis(),
            "tick_interval",
            self.domain_name(),
        )?;

        validate_positive(
            self.evaluation_interval.as_millis(),
            "evaluation_interval",
            self.domain_name(),
        )?;

        if let Some(max_vus) = self.max_vus {
            validate_positive(max_vus, "max_vus", self.domain_name())?;
        }

        self.pause.validate()?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "run"
    }
}

impl Validatable for PauseConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_range(self.min, self.max, "pause", self.domain_name())
    }

    fn domain_name(&self) -> &'static str {
        "run.pause"
    }
}

// Default value functions
fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_evaluation_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_graceful_ramp_down() -> Duration {
    Duration::from_secs(30)
}

fn default_graceful_stop() -> Duration {
    Duration::from_secs(30)
}

fn default_pause() -> Duration {
    Duration::from_secs(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_run_config_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.tick_interval, secs(1));
        assert_eq!(config.evaluation_interval, secs(1));
        assert_eq!(config.pause, PauseConfig::fixed(secs(1)));
        assert!(config.graceful);

        // No load profile yet
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_flat_profile_normalization() {
        let config = RunConfig::flat(20, secs(60));
        assert!(config.validate().is_ok());
        assert_eq!(config.normalized_stages(), vec![StageConfig::new(secs(60), 20)]);
        assert_eq!(config.initial_vus(), 20);
        assert_eq!(config.total_duration(), secs(60));
    }

    #[test]
    fn test_staged_profile() {
        let config = RunConfig::staged(vec![
            StageConfig::new(secs(30), 20),
            StageConfig::new(secs(60), 20),
            StageConfig::new(secs(30), 0),
        ]);
        assert!(config.validate().is_ok());
        assert_eq!(config.initial_vus(), 0);
        assert_eq!(config.total_duration(), secs(120));
        assert_eq!(config.peak_target(), 20);
    }

    #[test]
    fn test_mixed_profile_rejected() {
        let mut config = RunConfig::staged(vec![StageConfig::new(secs(10), 5)]);
        config.duration = Some(secs(10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_length_profile_rejected() {
        let config = RunConfig::staged(vec![StageConfig::new(Duration::ZERO, 5)]);
        assert!(config.validate().is_err());

        let config = RunConfig::flat(0, secs(10));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pause_range_validation() {
        let mut config = RunConfig::flat(1, secs(1));
        config.pause = PauseConfig::between(secs(2), secs(1));
        assert!(config.validate().is_err());

        config.pause = PauseConfig::between(Duration::from_millis(500), secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_tick_rejected() {
        let mut config = RunConfig::flat(1, secs(1));
        config.tick_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
