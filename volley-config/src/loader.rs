//! Configuration loading and environment variable handling

use crate::domains::http::HttpConfig;
use crate::domains::logging::{LogFormat, LogLevel, LoggingConfig};
use crate::domains::run::RunConfig;
use crate::domains::VolleyConfig;
use crate::error::{ConfigError, ConfigResult};
use log::{debug, warn};
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "VOLLEY".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<VolleyConfig> {
        self.load(VolleyConfig::default())
    }

    /// Apply environment overrides to `base` and validate the result
    pub fn load(&self, mut base: VolleyConfig) -> ConfigResult<VolleyConfig> {
        self.apply_env_overrides(&mut base)?;
        base.validate_all()?;
        Ok(base)
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut VolleyConfig) -> ConfigResult<()> {
        self.apply_run_overrides(&mut config.run)?;
        self.apply_http_overrides(&mut config.http)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply load profile overrides
    fn apply_run_overrides(&self, config: &mut RunConfig) -> ConfigResult<()> {
        if let Ok(vus) = self.get_env_var("VUS") {
            let vus: u64 = vus
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid VUS: {}", e)))?;
            if config.stages.is_empty() {
                config.vus = Some(vus);
            } else {
                warn!("{}_VUS ignored because stages are configured", self.prefix);
            }
        }

        if let Ok(duration) = self.get_env_var("DURATION") {
            let duration = parse_duration("DURATION", &duration)?;
            if config.stages.is_empty() {
                config.duration = Some(duration);
            } else {
                warn!("{}_DURATION ignored because stages are configured", self.prefix);
            }
        }

        if let Ok(grace) = self.get_env_var("GRACEFUL_RAMP_DOWN") {
            config.graceful_ramp_down = parse_duration("GRACEFUL_RAMP_DOWN", &grace)?;
        }

        if let Ok(max_vus) = self.get_env_var("MAX_VUS") {
            config.max_vus = Some(
                max_vus
                    .parse()
                    .map_err(|e| ConfigError::EnvError(format!("Invalid MAX_VUS: {}", e)))?,
            );
        }

        Ok(())
    }

    /// Apply HTTP config overrides
    fn apply_http_overrides(&self, config: &mut HttpConfig) -> ConfigResult<()> {
        if let Ok(timeout) = self.get_env_var("HTTP_TIMEOUT") {
            let seconds: u64 = timeout
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid HTTP_TIMEOUT: {}", e)))?;
            config.timeout = Duration::from_secs(seconds);
        }

        if let Ok(target_url) = self.get_env_var("TARGET_URL") {
            debug!("Using target URL from environment: {}", target_url);
            config.base_url = Some(target_url);
        }

        if let Ok(user_agent) = self.get_env_var("HTTP_USER_AGENT") {
            config.user_agent = user_agent;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(&self, config: &mut LoggingConfig) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_duration(name: &str, value: &str) -> ConfigResult<Duration> {
    humantime::parse_duration(value)
        .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e)))
}
