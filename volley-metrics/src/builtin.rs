//! Names of the metrics the engine records on its own

use crate::kind::MetricKind;

/// Requests issued through the iteration context
pub const HTTP_REQS: &str = "http_reqs";
/// Request latency in milliseconds
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// Requests that errored or returned a status outside 200..=399
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
/// Completed iterations
pub const ITERATIONS: &str = "iterations";
/// Iteration wall time in milliseconds
pub const ITERATION_DURATION: &str = "iteration_duration";
/// Completed iterations whose workload returned an error or panicked
pub const ITERATION_FAILED: &str = "iteration_failed";
/// Iterations cut short by hard cancellation
pub const ITERATIONS_INTERRUPTED: &str = "iterations_interrupted";
/// Check outcomes, tagged with `check=<name>`
pub const CHECKS: &str = "checks";
/// Live virtual users
pub const VUS: &str = "vus";
/// Highest number of live virtual users so far
pub const VUS_MAX: &str = "vus_max";

const BUILTINS: &[(&str, MetricKind)] = &[
    (HTTP_REQS, MetricKind::Counter),
    (HTTP_REQ_DURATION, MetricKind::Trend),
    (HTTP_REQ_FAILED, MetricKind::Rate),
    (ITERATIONS, MetricKind::Counter),
    (ITERATION_DURATION, MetricKind::Trend),
    (ITERATION_FAILED, MetricKind::Rate),
    (ITERATIONS_INTERRUPTED, MetricKind::Counter),
    (CHECKS, MetricKind::Rate),
    (VUS, MetricKind::Gauge),
    (VUS_MAX, MetricKind::Gauge),
];

/// Kind of a built-in metric, `None` for custom names
pub fn builtin_kind(name: &str) -> Option<MetricKind> {
    BUILTINS
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, kind)| *kind)
}

/// All built-in metrics with their kinds
pub fn builtins() -> impl Iterator<Item = (&'static str, MetricKind)> {
    BUILTINS.iter().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(builtin_kind("http_req_duration"), Some(MetricKind::Trend));
        assert_eq!(builtin_kind("http_req_failed"), Some(MetricKind::Rate));
        assert_eq!(builtin_kind("errors"), None);
        assert_eq!(builtins().count(), 10);
    }
}
