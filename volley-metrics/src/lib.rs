//! Metric sink for Volley load runs
//!
//! Virtual users stream observations into a shared [`MetricSink`]; the run
//! controller reads immutable [`AggregateStats`] snapshots from it to
//! evaluate thresholds. Every metric identity (name + tag set) maps to
//! exactly one accumulator guarded by its own lock, so concurrent updates
//! never lose or double-count an observation. Trend metrics are backed by
//! fixed-size HDR histograms, keeping memory bounded however long a run is.

pub mod builtin;
pub mod kind;
pub mod sink;
pub mod stats;

mod accumulator;

pub use kind::{MetricKind, TagSet};
pub use sink::MetricSink;
pub use stats::{AggregateStats, MetricSummary, TrendStats};
