//! Immutable aggregate views over recorded observations

use crate::kind::MetricKind;
use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::BTreeMap;

/// Percentiles reported in every trend summary
const SUMMARY_PERCENTILES: &[f64] = &[90.0, 95.0, 99.0];

/// Point-in-time aggregate of one metric (or a merge of several series)
#[derive(Debug, Clone)]
pub enum AggregateStats {
    Counter {
        /// Number of observations
        samples: u64,
        /// Sum of observed values
        total: f64,
    },
    Gauge {
        samples: u64,
        value: f64,
        min: f64,
        max: f64,
        /// Sink-wide sequence number of the last update, used when merging
        sequence: u64,
    },
    Rate {
        /// Observations with a non-zero value
        hits: u64,
        total: u64,
    },
    Trend(TrendStats),
}

/// Distribution of a trend metric, in milliseconds
#[derive(Debug, Clone)]
pub struct TrendStats {
    pub(crate) histogram: Histogram<u64>,
    pub(crate) count: u64,
    pub(crate) sum: f64,
    pub(crate) min: f64,
    pub(crate) max: f64,
}

impl TrendStats {
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    /// Estimated value at percentile `p` (0..=100)
    ///
    /// Accurate to three significant figures and clamped to the exact
    /// observed min/max.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let quantile = (p / 100.0).clamp(0.0, 1.0);
        let micros = self.histogram.value_at_quantile(quantile);
        (micros as f64 / 1000.0).clamp(self.min, self.max)
    }

    pub fn median(&self) -> f64 {
        self.percentile(50.0)
    }

    fn merge(&mut self, other: &TrendStats) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        // Both histograms share the same constant bounds, so adding cannot overflow them.
        if self.histogram.add(&other.histogram).is_err() {
            tracing::warn!("Failed to merge trend histograms; percentiles may be skewed");
        }
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

impl AggregateStats {
    pub fn kind(&self) -> MetricKind {
        match self {
            AggregateStats::Counter { .. } => MetricKind::Counter,
            AggregateStats::Gauge { .. } => MetricKind::Gauge,
            AggregateStats::Rate { .. } => MetricKind::Rate,
            AggregateStats::Trend(_) => MetricKind::Trend,
        }
    }

    /// Number of observations, whatever the kind
    pub fn count(&self) -> u64 {
        match self {
            AggregateStats::Counter { samples, .. } | AggregateStats::Gauge { samples, .. } => {
                *samples
            }
            AggregateStats::Rate { total, .. } => *total,
            AggregateStats::Trend(trend) => trend.count,
        }
    }

    /// Sum of values for counters and trends
    pub fn sum(&self) -> Option<f64> {
        match self {
            AggregateStats::Counter { total, .. } => Some(*total),
            AggregateStats::Trend(trend) => Some(trend.sum),
            _ => None,
        }
    }

    /// Last value of a gauge
    pub fn value(&self) -> Option<f64> {
        match self {
            AggregateStats::Gauge { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Fraction of non-zero observations of a rate, `None` before any sample
    pub fn rate(&self) -> Option<f64> {
        match self {
            AggregateStats::Rate { hits, total } if *total > 0 => {
                Some(*hits as f64 / *total as f64)
            }
            _ => None,
        }
    }

    pub fn min(&self) -> Option<f64> {
        match self {
            AggregateStats::Gauge { min, .. } => Some(*min),
            AggregateStats::Trend(trend) if trend.count > 0 => Some(trend.min),
            _ => None,
        }
    }

    pub fn max(&self) -> Option<f64> {
        match self {
            AggregateStats::Gauge { max, .. } => Some(*max),
            AggregateStats::Trend(trend) if trend.count > 0 => Some(trend.max),
            _ => None,
        }
    }

    pub fn avg(&self) -> Option<f64> {
        match self {
            AggregateStats::Trend(trend) if trend.count > 0 => Some(trend.avg()),
            _ => None,
        }
    }

    pub fn percentile(&self, p: f64) -> Option<f64> {
        match self {
            AggregateStats::Trend(trend) if trend.count > 0 => Some(trend.percentile(p)),
            _ => None,
        }
    }

    pub fn trend(&self) -> Option<&TrendStats> {
        match self {
            AggregateStats::Trend(trend) => Some(trend),
            _ => None,
        }
    }

    /// Fold another series of the same kind into this one
    ///
    /// Series of a different kind are ignored; the sink never mixes kinds
    /// under one metric name.
    pub fn merge(&mut self, other: &AggregateStats) {
        if self.kind() == other.kind() && self.count() == 0 {
            *self = other.clone();
            return;
        }
        match (self, other) {
            (
                AggregateStats::Counter { samples, total },
                AggregateStats::Counter {
                    samples: other_samples,
                    total: other_total,
                },
            ) => {
                *samples += other_samples;
                *total += other_total;
            }
            (
                AggregateStats::Gauge {
                    samples,
                    value,
                    min,
                    max,
                    sequence,
                },
                AggregateStats::Gauge {
                    samples: other_samples,
                    value: other_value,
                    min: other_min,
                    max: other_max,
                    sequence: other_sequence,
                },
            ) => {
                *samples += other_samples;
                *min = (*min).min(*other_min);
                *max = (*max).max(*other_max);
                if *other_sequence > *sequence {
                    *value = *other_value;
                    *sequence = *other_sequence;
                }
            }
            (
                AggregateStats::Rate { hits, total },
                AggregateStats::Rate {
                    hits: other_hits,
                    total: other_total,
                },
            ) => {
                *hits += other_hits;
                *total += other_total;
            }
            (AggregateStats::Trend(trend), AggregateStats::Trend(other_trend)) => {
                trend.merge(other_trend);
            }
            _ => {}
        }
    }

    /// Flatten into named values for reporting
    pub fn summary_values(&self) -> BTreeMap<String, f64> {
        let mut values = BTreeMap::new();
        match self {
            AggregateStats::Counter { total, .. } => {
                values.insert("count".to_string(), *total);
            }
            AggregateStats::Gauge { value, min, max, .. } => {
                values.insert("value".to_string(), *value);
                values.insert("min".to_string(), *min);
                values.insert("max".to_string(), *max);
            }
            AggregateStats::Rate { hits, total } => {
                values.insert("rate".to_string(), self.rate().unwrap_or(0.0));
                values.insert("passes".to_string(), *hits as f64);
                values.insert("fails".to_string(), (total - hits) as f64);
            }
            AggregateStats::Trend(trend) => {
                values.insert("avg".to_string(), trend.avg());
                values.insert("min".to_string(), trend.min);
                values.insert("med".to_string(), trend.median());
                values.insert("max".to_string(), trend.max);
                for p in SUMMARY_PERCENTILES {
                    values.insert(format!("p({})", p), trend.percentile(*p));
                }
            }
        }
        values
    }
}

/// Final, serializable view of one metric for the run result
#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub name: String,
    pub kind: MetricKind,
    pub samples: u64,
    pub values: BTreeMap<String, f64>,
}

impl MetricSummary {
    pub fn from_stats(name: impl Into<String>, stats: &AggregateStats) -> Self {
        Self {
            name: name.into(),
            kind: stats.kind(),
            samples: stats.count(),
            values: stats.summary_values(),
        }
    }
}
