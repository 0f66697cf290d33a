//! Threshold compilation errors

use volley_metrics::MetricKind;

/// Error raised while compiling a threshold definition
///
/// All variants are fatal configuration errors: they surface before any
/// virtual user is spawned.
#[derive(Debug, thiserror::Error)]
pub enum ThresholdError {
    #[error("Invalid threshold expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Invalid metric selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Statistic '{statistic}' does not apply to {kind} metric '{metric}'")]
    InapplicableStatistic {
        metric: String,
        kind: MetricKind,
        statistic: String,
    },

    #[error("Invalid threshold configuration: {0}")]
    Config(#[from] volley_config::ConfigError),
}

