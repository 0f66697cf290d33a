//! HTTP client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use volley_config::HttpConfig;

/// Settings the reqwest adapter is built from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Default request timeout
    pub timeout: Duration,

    /// Maximum number of redirects to follow
    pub max_redirects: u32,

    pub user_agent: String,

    /// Whether to verify TLS certificates
    pub verify_ssl: bool,

    /// Prepended to request URLs starting with `/`
    pub base_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        HttpConfig::default().into()
    }
}

impl From<HttpConfig> for ClientConfig {
    fn from(config: HttpConfig) -> Self {
        Self {
            timeout: config.timeout,
            max_redirects: config.max_redirects,
            user_agent: config.user_agent,
            verify_ssl: config.verify_ssl,
            base_url: config.base_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }
}

impl ClientConfig {
    /// Resolve a request URL against `base_url`
    ///
    /// Only paths beginning with `/` are prefixed; the URL is never parsed.
    pub fn resolve_url(&self, url: &str) -> String {
        match &self.base_url {
            Some(base) if url.starts_with('/') => format!("{}{}", base, url),
            _ => url.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_http_config() {
        let config: ClientConfig = HttpConfig {
            timeout: Duration::from_secs(5),
            base_url: Some("http://localhost:8080/".to_string()),
            ..HttpConfig::default()
        }
        .into();

        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.base_url.as_deref(), Some("http://localhost:8080"));
        assert!(config.user_agent.starts_with("Volley/"));
    }

    #[test]
    fn test_resolve_url() {
        let config = ClientConfig {
            base_url: Some("http://api.local".to_string()),
            ..ClientConfig::default()
        };
        assert_eq!(config.resolve_url("/users/1"), "http://api.local/users/1");
        assert_eq!(config.resolve_url("https://other/x"), "https://other/x");

        let bare = ClientConfig::default();
        assert_eq!(bare.resolve_url("/users/1"), "/users/1");
    }
}
