//! Threshold evaluation against a metric sink

use crate::error::ThresholdError;
use crate::threshold::Threshold;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use volley_config::ThresholdConfig;
use volley_metrics::MetricSink;

/// Outcome of one threshold at one evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdResult {
    /// Position of the threshold in the evaluator
    pub index: usize,
    /// Metric selector as declared, e.g. `http_req_duration{name:home}`
    pub metric: String,
    pub expression: String,
    pub passed: bool,
    /// Statistic value the predicate was checked against
    pub observed: Option<f64>,
    /// Samples behind the observation
    pub samples: u64,
    pub abort_on_fail: bool,
}

/// Evaluates a fixed set of compiled thresholds
#[derive(Debug, Clone, Default)]
pub struct ThresholdEvaluator {
    thresholds: Vec<Threshold>,
}

impl ThresholdEvaluator {
    pub fn new(thresholds: Vec<Threshold>) -> Self {
        Self { thresholds }
    }

    /// Compile every declaration, failing on the first invalid one
    pub fn compile(configs: &[ThresholdConfig]) -> Result<Self, ThresholdError> {
        let thresholds = configs
            .iter()
            .map(Threshold::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(thresholds))
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Check every threshold against the current contents of `sink`
    ///
    /// A metric without observations passes. A statistic that does not apply
    /// to the metric's recorded kind fails without an observed value.
    pub fn evaluate(&self, sink: &MetricSink) -> Vec<ThresholdResult> {
        self.thresholds
            .iter()
            .enumerate()
            .map(|(index, threshold)| {
                let stats = sink
                    .snapshot(&threshold.selector.name, &threshold.selector.tags)
                    .filter(|stats| stats.count() > 0);

                let (passed, observed, samples) = match stats {
                    None => (true, None, 0),
                    Some(stats) => match threshold.expr.statistic.observe(&stats) {
                        Some(value) => (threshold.expr.holds(value), Some(value), stats.count()),
                        None => {
                            debug!(
                                "Statistic '{}' does not apply to {} metric '{}'",
                                threshold.expr.statistic,
                                stats.kind(),
                                threshold.selector.name
                            );
                            (false, None, stats.count())
                        }
                    },
                };

                ThresholdResult {
                    index,
                    metric: threshold.selector.to_string(),
                    expression: threshold.expr.to_string(),
                    passed,
                    observed,
                    samples,
                    abort_on_fail: threshold.abort_on_fail,
                }
            })
            .collect()
    }

    /// First failed result whose threshold aborts a run that is `elapsed` old
    pub fn abort_trigger<'a>(
        &self,
        results: &'a [ThresholdResult],
        elapsed: Duration,
    ) -> Option<&'a ThresholdResult> {
        results.iter().find(|result| {
            !result.passed
                && self
                    .thresholds
                    .get(result.index)
                    .is_some_and(|threshold| threshold.aborts_at(elapsed))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volley_metrics::{builtin, TagSet};

    fn evaluator(configs: &[ThresholdConfig]) -> ThresholdEvaluator {
        ThresholdEvaluator::compile(configs).unwrap()
    }

    #[test]
    fn test_rate_threshold_is_strict() {
        let sink = MetricSink::new();
        for _ in 0..99 {
            sink.add_rate(builtin::HTTP_REQ_FAILED, &TagSet::new(), false);
        }
        sink.add_rate(builtin::HTTP_REQ_FAILED, &TagSet::new(), true);

        let results = evaluator(&[ThresholdConfig::new(builtin::HTTP_REQ_FAILED, "rate<0.01")])
            .evaluate(&sink);
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
        assert_eq!(results[0].observed, Some(0.01));
        assert_eq!(results[0].samples, 100);
    }

    #[test]
    fn test_missing_metric_passes() {
        let sink = MetricSink::new();
        sink.declare("errors", volley_metrics::MetricKind::Rate);

        let results = evaluator(&[
            ThresholdConfig::new(builtin::HTTP_REQ_DURATION, "p(95)<500"),
            ThresholdConfig::new("errors", "rate<0.1"),
        ])
        .evaluate(&sink);

        assert!(results.iter().all(|r| r.passed && r.observed.is_none()));
    }

    #[test]
    fn test_trend_and_counter_statistics() {
        let sink = MetricSink::new();
        for ms in 1..=100 {
            sink.add_trend(builtin::HTTP_REQ_DURATION, &TagSet::new(), ms as f64);
        }
        sink.add_counter(builtin::ITERATIONS, &TagSet::new(), 3.0);
        sink.add_counter(builtin::ITERATIONS, &TagSet::new(), 2.0);

        let results = evaluator(&[
            ThresholdConfig::new(builtin::HTTP_REQ_DURATION, "p(95)<500"),
            ThresholdConfig::new(builtin::HTTP_REQ_DURATION, "max<50"),
            ThresholdConfig::new(builtin::HTTP_REQ_DURATION, "avg<=50.5"),
            ThresholdConfig::new(builtin::ITERATIONS, "count==5"),
        ])
        .evaluate(&sink);

        assert!(results[0].passed);
        assert!(!results[1].passed);
        assert_eq!(results[1].observed, Some(100.0));
        assert!(results[2].passed);
        assert!(results[3].passed);
    }

    #[test]
    fn test_tag_filtered_threshold() {
        let sink = MetricSink::new();
        let home = TagSet::new().with("name", "home");
        let login = TagSet::new().with("name", "login");
        for _ in 0..10 {
            sink.add_trend(builtin::HTTP_REQ_DURATION, &home, 100.0);
            sink.add_trend(builtin::HTTP_REQ_DURATION, &login, 900.0);
        }

        let results = evaluator(&[
            ThresholdConfig::new("http_req_duration{name:home}", "p(95)<500"),
            ThresholdConfig::new("http_req_duration{name:login}", "p(95)<500"),
            ThresholdConfig::new("http_req_duration{name:search}", "p(95)<500"),
        ])
        .evaluate(&sink);

        assert!(results[0].passed);
        assert!(!results[1].passed);
        assert!(results[2].passed);
        assert_eq!(results[0].metric, "http_req_duration{name:home}");
    }

    #[test]
    fn test_inapplicable_statistic_on_custom_metric_fails() {
        let sink = MetricSink::new();
        sink.add_rate("errors", &TagSet::new(), false);

        let results = evaluator(&[ThresholdConfig::new("errors", "p(95)<1")]).evaluate(&sink);
        assert!(!results[0].passed);
        assert_eq!(results[0].observed, None);
    }

    #[test]
    fn test_abort_trigger_honours_delay() {
        let sink = MetricSink::new();
        for i in 0..10 {
            sink.add_rate("errors", &TagSet::new(), i % 2 == 0);
        }

        let evaluator = evaluator(&[
            ThresholdConfig::new("errors", "rate<0.5"),
            ThresholdConfig::new("errors", "rate<0.1")
                .abort_on_fail()
                .with_delay_abort_eval(Duration::from_secs(30)),
        ]);
        let results = evaluator.evaluate(&sink);
        assert!(results.iter().all(|r| !r.passed));

        assert!(evaluator
            .abort_trigger(&results, Duration::from_secs(29))
            .is_none());
        let trigger = evaluator
            .abort_trigger(&results, Duration::from_secs(30))
            .unwrap();
        assert_eq!(trigger.index, 1);
    }
}
