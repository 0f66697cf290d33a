//! Domain-specific configuration modules

pub mod http;
pub mod logging;
pub mod run;
pub mod thresholds;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Volley configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VolleyConfig {
    /// Load profile and virtual user behaviour
    #[serde(default)]
    pub run: run::RunConfig,

    /// Pass/fail criteria evaluated during the run
    #[serde(default)]
    pub thresholds: Vec<thresholds::ThresholdConfig>,

    /// HTTP client configuration
    #[serde(default)]
    pub http: http::HttpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl VolleyConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.run.validate()?;

        for threshold in &self.thresholds {
            threshold.validate()?;
        }

        self.http.validate()?;
        self.logging.validate()?;

        Ok(())
    }
}
