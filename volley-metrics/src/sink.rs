//! Thread-safe metric sink

use crate::accumulator::Accumulator;
use crate::kind::{MetricKind, TagSet};
use crate::stats::{AggregateStats, MetricSummary};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// All series recorded under one metric name
struct MetricSeries {
    kind: MetricKind,
    /// Aggregate over every tag set
    total: Mutex<Accumulator>,
    /// One accumulator per distinct, non-empty tag set
    tagged: RwLock<HashMap<TagSet, Arc<Mutex<Accumulator>>>>,
    kind_conflict_logged: AtomicBool,
}

impl MetricSeries {
    fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            total: Mutex::new(Accumulator::new(kind)),
            tagged: RwLock::new(HashMap::new()),
            kind_conflict_logged: AtomicBool::new(false),
        }
    }

    fn tagged_accumulator(&self, tags: &TagSet) -> Arc<Mutex<Accumulator>> {
        if let Some(acc) = self.tagged.read().get(tags) {
            return Arc::clone(acc);
        }

        let mut tagged = self.tagged.write();
        Arc::clone(
            tagged
                .entry(tags.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Accumulator::new(self.kind)))),
        )
    }
}

/// Accumulates named observations from many concurrent writers
///
/// `record` only holds a lock for the duration of one accumulator update.
/// Snapshots are coherent per recording but not atomic across metrics.
pub struct MetricSink {
    series: RwLock<HashMap<String, Arc<MetricSeries>>>,
    sequence: AtomicU64,
    rejected: AtomicU64,
}

impl MetricSink {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Register `name` with `kind` ahead of the first observation
    ///
    /// Returns the kind the metric ends up with, which differs from `kind`
    /// when the name was already registered.
    pub fn declare(&self, name: &str, kind: MetricKind) -> MetricKind {
        self.series_for(name, kind).kind
    }

    /// Append an observation
    ///
    /// Unknown names are created with `kind`. An observation whose kind
    /// disagrees with the registered one is dropped and counted in
    /// [`MetricSink::rejected_samples`].
    pub fn record(&self, name: &str, kind: MetricKind, tags: &TagSet, value: f64) {
        let series = self.series_for(name, kind);
        if series.kind != kind {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            if !series.kind_conflict_logged.swap(true, Ordering::Relaxed) {
                warn!(
                    "Dropping {} sample for metric '{}' already registered as {}",
                    kind, name, series.kind
                );
            }
            return;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        series.total.lock().add(value, sequence);

        if !tags.is_empty() {
            series.tagged_accumulator(tags).lock().add(value, sequence);
        }
    }

    pub fn add_counter(&self, name: &str, tags: &TagSet, value: f64) {
        self.record(name, MetricKind::Counter, tags, value);
    }

    pub fn set_gauge(&self, name: &str, tags: &TagSet, value: f64) {
        self.record(name, MetricKind::Gauge, tags, value);
    }

    pub fn add_rate(&self, name: &str, tags: &TagSet, hit: bool) {
        self.record(name, MetricKind::Rate, tags, if hit { 1.0 } else { 0.0 });
    }

    pub fn add_trend(&self, name: &str, tags: &TagSet, value: f64) {
        self.record(name, MetricKind::Trend, tags, value);
    }

    /// Aggregate of `name` restricted to samples whose tags contain `filter`
    ///
    /// An empty filter returns the aggregate over every tag set. `None` when
    /// the metric was never declared or recorded.
    pub fn snapshot(&self, name: &str, filter: &TagSet) -> Option<AggregateStats> {
        let series = self.series.read().get(name).cloned()?;

        if filter.is_empty() {
            return Some(series.total.lock().snapshot());
        }

        let matching: Vec<Arc<Mutex<Accumulator>>> = series
            .tagged
            .read()
            .iter()
            .filter(|(tags, _)| tags.contains(filter))
            .map(|(_, acc)| Arc::clone(acc))
            .collect();

        let mut merged = Accumulator::new(series.kind).snapshot();
        for acc in matching {
            merged.merge(&acc.lock().snapshot());
        }
        Some(merged)
    }

    /// Registered kind of `name`
    pub fn kind_of(&self, name: &str) -> Option<MetricKind> {
        self.series.read().get(name).map(|series| series.kind)
    }

    /// Names of all registered metrics, sorted
    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.series.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Name-wide summaries of every metric, sorted by name
    pub fn snapshot_all(&self) -> Vec<MetricSummary> {
        self.metric_names()
            .into_iter()
            .filter_map(|name| {
                let stats = self.snapshot(&name, &TagSet::new())?;
                Some(MetricSummary::from_stats(name, &stats))
            })
            .collect()
    }

    /// Observations dropped because of a kind conflict
    pub fn rejected_samples(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn series_for(&self, name: &str, kind: MetricKind) -> Arc<MetricSeries> {
        if let Some(series) = self.series.read().get(name) {
            return Arc::clone(series);
        }

        let mut series = self.series.write();
        Arc::clone(
            series
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MetricSeries::new(kind))),
        )
    }
}

impl Default for MetricSink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricSink")
            .field("metrics", &self.metric_names())
            .field("rejected", &self.rejected_samples())
            .finish()
    }
}
