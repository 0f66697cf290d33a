use anyhow::Result;
use tracing_subscriber::EnvFilter;
use volley_config::{LogFormat, LoggingConfig};

/// Build the filter for `config`, falling back to `RUST_LOG` and then `info`
pub fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    let mut filter = config.level.to_string();
    for directive in &config.directives {
        filter.push(',');
        filter.push_str(directive.trim());
    }

    EnvFilter::try_new(&filter)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging from configuration
///
/// A global subscriber that is already installed (by the embedding
/// application or another test) is left in place.
pub fn init_logging_from_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(config);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Initialize simple tracing for basic console output
pub fn init_simple_tracing(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // Use try_init to avoid panic if global subscriber already set
    if tracing_subscriber::fmt().with_env_filter(env_filter).try_init().is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use volley_config::LogLevel;

    #[test]
    fn test_env_filter_includes_directives() {
        let config = LoggingConfig {
            level: LogLevel::Warn,
            directives: vec!["volley_engine::pool=debug".to_string()],
            ..LoggingConfig::default()
        };

        let filter = build_env_filter(&config).to_string();
        assert!(filter.contains("warn"));
        assert!(filter.contains("volley_engine::pool=debug"));
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig {
            format: LogFormat::Compact,
            ..LoggingConfig::default()
        };

        assert!(init_logging_from_config(&config).is_ok());
        assert!(init_logging_from_config(&config).is_ok());
        assert!(init_simple_tracing("debug").is_ok());
    }
}
