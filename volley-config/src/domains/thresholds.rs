//! Threshold declarations
//!
//! Only the raw declaration lives here. Expressions are compiled (and
//! rejected when malformed) by `volley-thresholds` before a run starts.

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single threshold declaration, e.g. `http_req_duration` / `p(95)<500`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Metric selector, optionally with a tag filter: `http_req_duration{name:home}`
    pub metric: String,

    /// Predicate over an aggregate statistic of the metric
    pub expression: String,

    /// End the run as soon as this threshold fails
    #[serde(default = "crate::domains::utils::default_false")]
    pub abort_on_fail: bool,

    /// Ignore failures for abort purposes until the run is this old
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub delay_abort_eval: Option<Duration>,
}

impl ThresholdConfig {
    /// Create a non-aborting threshold
    pub fn new(metric: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            expression: expression.into(),
            abort_on_fail: false,
            delay_abort_eval: None,
        }
    }

    /// Mark the threshold as aborting the run on failure
    pub fn abort_on_fail(mut self) -> Self {
        self.abort_on_fail = true;
        self
    }

    /// Delay abort evaluation until the run has been going for `delay`
    pub fn with_delay_abort_eval(mut self, delay: Duration) -> Self {
        self.delay_abort_eval = Some(delay);
        self
    }
}

impl Validatable for ThresholdConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.metric, "metric", self.domain_name())?;
        validate_required_string(&self.expression, "expression", self.domain_name())?;

        if self.delay_abort_eval.is_some() && !self.abort_on_fail {
            return Err(self.validation_error(format!(
                "delay_abort_eval on '{}' has no effect without abort_on_fail",
                self.metric
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "thresholds"
    }
}
