//! Domain-driven configuration for Volley load runs
//!
//! This crate provides the configuration surface of a run split by
//! functional domain (load profile, thresholds, HTTP client, logging),
//! with validation, defaults, and environment variable overrides.
//! Reading configuration files is left to the embedding application; every
//! type here is `serde`-deserializable.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    http::HttpConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    run::{PauseConfig, RunConfig, StageConfig},
    thresholds::ThresholdConfig,
    VolleyConfig,
};
