//! Per-series accumulators

use crate::kind::MetricKind;
use crate::stats::{AggregateStats, TrendStats};
use hdrhistogram::Histogram;
use std::sync::LazyLock;

/// Smallest trackable trend value, in microseconds
const TREND_LOWEST_US: u64 = 1;
/// Largest trackable trend value (one hour), in microseconds
const TREND_HIGHEST_US: u64 = 3_600_000_000;
/// Significant figures kept by trend histograms
const TREND_SIGFIG: u8 = 3;

/// Empty histogram every trend is cloned from
///
/// Built once. The constant bounds satisfy `1 <= low`, `2 * low <= high` and
/// `sigfig <= 5`, so construction cannot fail.
static TREND_TEMPLATE: LazyLock<Histogram<u64>> = LazyLock::new(|| {
    Histogram::new_with_bounds(TREND_LOWEST_US, TREND_HIGHEST_US, TREND_SIGFIG)
        .expect("Valid trend histogram bounds")
});

pub(crate) fn new_histogram() -> Histogram<u64> {
    Histogram::new_from(&*TREND_TEMPLATE)
}

/// Mutable aggregation state for one metric identity
#[derive(Debug)]
pub(crate) enum Accumulator {
    Counter { samples: u64, total: f64 },
    Gauge { samples: u64, value: f64, min: f64, max: f64, sequence: u64 },
    Rate { hits: u64, total: u64 },
    Trend(TrendStats),
}

impl Accumulator {
    pub(crate) fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Accumulator::Counter {
                samples: 0,
                total: 0.0,
            },
            MetricKind::Gauge => Accumulator::Gauge {
                samples: 0,
                value: 0.0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                sequence: 0,
            },
            MetricKind::Rate => Accumulator::Rate { hits: 0, total: 0 },
            MetricKind::Trend => Accumulator::Trend(TrendStats {
                histogram: new_histogram(),
                count: 0,
                sum: 0.0,
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            }),
        }
    }

    /// Fold one observation in. `sequence` orders gauge updates across series.
    pub(crate) fn add(&mut self, value: f64, sequence: u64) {
        match self {
            Accumulator::Counter { samples, total } => {
                *samples += 1;
                *total += value;
            }
            Accumulator::Gauge {
                samples,
                value: last,
                min,
                max,
                sequence: last_sequence,
            } => {
                *samples += 1;
                *last = value;
                *min = (*min).min(value);
                *max = (*max).max(value);
                *last_sequence = sequence;
            }
            Accumulator::Rate { hits, total } => {
                *total += 1;
                if value != 0.0 {
                    *hits += 1;
                }
            }
            Accumulator::Trend(trend) => {
                let value = if value.is_finite() { value.max(0.0) } else { 0.0 };
                let micros = (value * 1000.0).round() as u64;
                trend.histogram.saturating_record(micros);
                trend.count += 1;
                trend.sum += value;
                trend.min = trend.min.min(value);
                trend.max = trend.max.max(value);
            }
        }
    }

    pub(crate) fn snapshot(&self) -> AggregateStats {
        match self {
            Accumulator::Counter { samples, total } => AggregateStats::Counter {
                samples: *samples,
                total: *total,
            },
            Accumulator::Gauge {
                samples,
                value,
                min,
                max,
                sequence,
            } => {
                let (min, max) = if *samples == 0 { (0.0, 0.0) } else { (*min, *max) };
                AggregateStats::Gauge {
                    samples: *samples,
                    value: *value,
                    min,
                    max,
                    sequence: *sequence,
                }
            }
            Accumulator::Rate { hits, total } => AggregateStats::Rate {
                hits: *hits,
                total: *total,
            },
            Accumulator::Trend(trend) => AggregateStats::Trend(trend.clone()),
        }
    }
}
