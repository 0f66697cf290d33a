//! Compiled thresholds

use crate::error::ThresholdError;
use crate::expr::ThresholdExpr;
use std::fmt;
use std::time::Duration;
use volley_config::{ThresholdConfig, Validatable};
use volley_metrics::{builtin, TagSet};

/// Metric name plus optional tag filter, e.g. `http_req_duration{name:home}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSelector {
    pub name: String,
    pub tags: TagSet,
}

impl MetricSelector {
    pub fn parse(selector: &str) -> Result<Self, ThresholdError> {
        let invalid = |reason: &str| ThresholdError::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.to_string(),
        };

        let selector_trimmed = selector.trim();
        let (name, filter) = match selector_trimmed.find('{') {
            Some(open) => {
                let body = selector_trimmed[open + 1..]
                    .strip_suffix('}')
                    .ok_or_else(|| invalid("unterminated tag filter"))?;
                (selector_trimmed[..open].trim(), Some(body))
            }
            None => (selector_trimmed, None),
        };

        if name.is_empty() {
            return Err(invalid("missing metric name"));
        }
        if name.contains(|c: char| c.is_whitespace() || c == '}') {
            return Err(invalid("metric name contains invalid characters"));
        }

        let mut tags = TagSet::new();
        if let Some(body) = filter {
            for pair in body.split(',') {
                let (key, value) = pair
                    .split_once(':')
                    .ok_or_else(|| invalid("tag filter entries must be key:value"))?;
                let (key, value) = (key.trim(), value.trim());
                if key.is_empty() || value.is_empty() {
                    return Err(invalid("empty tag key or value"));
                }
                tags.insert(key, value);
            }
        }

        Ok(Self {
            name: name.to_string(),
            tags,
        })
    }
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tags.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}{}", self.name, self.tags)
        }
    }
}

/// A threshold ready for evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub selector: MetricSelector,
    pub expr: ThresholdExpr,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Duration,
}

impl Threshold {
    /// Parse and check a declared threshold
    ///
    /// Statistics that cannot apply to a built-in metric are rejected here;
    /// custom metrics are only known at run time.
    pub fn compile(config: &ThresholdConfig) -> Result<Self, ThresholdError> {
        config.validate()?;

        let selector = MetricSelector::parse(&config.metric)?;
        let expr = ThresholdExpr::parse(&config.expression)?;

        if let Some(kind) = builtin::builtin_kind(&selector.name) {
            if !expr.statistic.applies_to(kind) {
                return Err(ThresholdError::InapplicableStatistic {
                    metric: selector.name.clone(),
                    kind,
                    statistic: expr.statistic.to_string(),
                });
            }
        }

        Ok(Self {
            selector,
            expr,
            abort_on_fail: config.abort_on_fail,
            delay_abort_eval: config.delay_abort_eval.unwrap_or_default(),
        })
    }

    /// Whether a failure of this threshold should end a run that is `elapsed` old
    pub fn aborts_at(&self, elapsed: Duration) -> bool {
        self.abort_on_fail && elapsed >= self.delay_abort_eval
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.selector, self.expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Statistic;
    use volley_metrics::MetricKind;

    #[test]
    fn test_selector_parsing() {
        let plain = MetricSelector::parse("http_req_duration").unwrap();
        assert_eq!(plain.name, "http_req_duration");
        assert!(plain.tags.is_empty());

        let filtered = MetricSelector::parse("http_req_duration{ name: home , method:GET}").unwrap();
        assert_eq!(filtered.name, "http_req_duration");
        assert_eq!(filtered.tags.get("name"), Some("home"));
        assert_eq!(filtered.tags.get("method"), Some("GET"));
        assert_eq!(filtered.to_string(), "http_req_duration{method:GET,name:home}");

        let url = MetricSelector::parse("http_req_duration{name:http://host/a}").unwrap();
        assert_eq!(url.tags.get("name"), Some("http://host/a"));
    }

    #[test]
    fn test_selector_rejects_malformed() {
        for bad in ["", "{name:x}", "http_reqs{name:x", "http_reqs{name}", "http_reqs{:x}", "my metric"] {
            assert!(
                matches!(
                    MetricSelector::parse(bad),
                    Err(ThresholdError::InvalidSelector { .. })
                ),
                "expected '{}' to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_compile() {
        let config = ThresholdConfig::new("http_req_failed", "rate<0.1")
            .abort_on_fail()
            .with_delay_abort_eval(Duration::from_secs(10));
        let threshold = Threshold::compile(&config).unwrap();

        assert_eq!(threshold.expr.statistic, Statistic::Rate);
        assert!(!threshold.aborts_at(Duration::from_secs(9)));
        assert!(threshold.aborts_at(Duration::from_secs(10)));
        assert_eq!(threshold.to_string(), "http_req_failed: rate<0.1");
    }

    #[test]
    fn test_inapplicable_statistic_on_builtin_is_fatal() {
        let err = Threshold::compile(&ThresholdConfig::new("http_req_duration", "rate<0.1")).unwrap_err();
        assert!(matches!(
            err,
            ThresholdError::InapplicableStatistic {
                kind: MetricKind::Trend,
                ..
            }
        ));

        // Unknown metrics are accepted; they are checked against data at run time.
        assert!(Threshold::compile(&ThresholdConfig::new("errors", "p(95)<1")).is_ok());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ThresholdConfig::new("errors", "rate<0.1")
            .with_delay_abort_eval(Duration::from_secs(5));
        assert!(matches!(
            Threshold::compile(&config),
            Err(ThresholdError::Config(_))
        ));
    }
}
