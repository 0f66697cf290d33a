//! Engine error types

use thiserror::Error;
use volley_config::ConfigError;
use volley_http::HttpError;
use volley_thresholds::ThresholdError;

/// Errors that prevent a run from starting
///
/// Nothing that happens once virtual users are running is an `EngineError`:
/// workload failures become metrics, threshold breaches drive the verdict
/// and scheduling faults are logged and flag the run as degraded.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Threshold error: {0}")]
    Threshold(#[from] ThresholdError),

    #[error("HTTP client error: {0}")]
    Http(#[from] HttpError),
}

pub type EngineResult<T> = Result<T, EngineError>;
