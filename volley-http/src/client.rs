//! HTTP client implementations

use crate::config::ClientConfig;
use crate::errors::HttpError;
use crate::types::{HttpMethod, HttpResponse, RequestOptions};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Request/response collaborator used by workloads
///
/// Implementations never fail a request with `Err`: transport problems are
/// reported through [`HttpResponse::error`].
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    async fn request(&self, method: HttpMethod, url: &str, options: RequestOptions)
        -> HttpResponse;
}

/// [`HttpClient`] backed by a shared `reqwest` connection pool
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
    config: ClientConfig,
}

impl ReqwestClient {
    pub fn new(config: ClientConfig) -> Result<Self, HttpError> {
        debug!(
            "Creating HTTP client with {}s timeout",
            config.timeout.as_secs()
        );
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .redirect(reqwest::redirect::Policy::limited(
                config.max_redirects as usize,
            ))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn build_headers(options: &RequestOptions) -> Result<HeaderMap, HttpError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            let header_name = HeaderName::from_str(name).map_err(|e| HttpError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            let header_value =
                HeaderValue::from_str(value).map_err(|e| HttpError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            headers.insert(header_name, header_value);
        }
        Ok(headers)
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestClient {
    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        options: RequestOptions,
    ) -> HttpResponse {
        let url = self.config.resolve_url(url);
        let start = Instant::now();

        let headers = match Self::build_headers(&options) {
            Ok(headers) => headers,
            Err(e) => return HttpResponse::transport_error(e.to_string(), start.elapsed()),
        };

        let mut builder = self.client.request(method.into(), &url).headers(headers);
        if let Some(body) = options.body {
            builder = builder.body(body);
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("{} {} failed: {}", method, url, e);
                return HttpResponse::transport_error(e.to_string(), start.elapsed());
            }
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(body) => HttpResponse::new(status, body.to_vec(), start.elapsed()),
            Err(e) => {
                warn!("{} {} body read failed: {}", method, url, e);
                HttpResponse {
                    status,
                    body: Vec::new(),
                    duration: start.elapsed(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// Canned response served by [`MockHttpClient`]
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Simulated time on the wire
    pub latency: Duration,
    /// Simulated transport failure
    pub error: Option<String>,
}

impl MockResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::status(200).with_body(body)
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            latency: Duration::ZERO,
            error: None,
        }
    }

    pub fn transport_error(error: impl Into<String>) -> Self {
        Self {
            status: 0,
            body: Vec::new(),
            latency: Duration::ZERO,
            error: Some(error.into()),
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

type Responder = dyn Fn(HttpMethod, &str, &RequestOptions) -> MockResponse + Send + Sync;

/// In-memory [`HttpClient`] for tests and dry runs
///
/// Routes are keyed `"METHOD:URL"`. Unmatched requests go to the responder
/// if one is set, otherwise they get a 404.
#[derive(Clone, Default)]
pub struct MockHttpClient {
    mocks: HashMap<String, MockResponse>,
    responder: Option<Arc<Responder>>,
    requests: Arc<AtomicU64>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute every response with `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(HttpMethod, &str, &RequestOptions) -> MockResponse + Send + Sync + 'static,
    {
        Self {
            responder: Some(Arc::new(responder)),
            ..Self::default()
        }
    }

    pub fn add_mock(&mut self, method: HttpMethod, url: &str, response: MockResponse) {
        let key = format!("{}:{}", method.as_str(), url);
        self.mocks.insert(key, response);
        debug!("Added HTTP mock for {} {}", method, url);
    }

    /// Builder-style [`MockHttpClient::add_mock`]
    pub fn mock(mut self, method: HttpMethod, url: &str, response: MockResponse) -> Self {
        self.add_mock(method, url, response);
        self
    }

    /// Number of requests served so far
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MockHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHttpClient")
            .field("mocks", &self.mocks.len())
            .field("responder", &self.responder.is_some())
            .field("requests", &self.request_count())
            .finish()
    }
}

#[async_trait::async_trait]
impl HttpClient for MockHttpClient {
    async fn request(
        &self,
        method: HttpMethod,
        url: &str,
        options: RequestOptions,
    ) -> HttpResponse {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();

        let key = format!("{}:{}", method.as_str(), url);
        let mock = match (self.mocks.get(&key), &self.responder) {
            (Some(mock), _) => mock.clone(),
            (None, Some(responder)) => responder(method, url, &options),
            (None, None) => {
                debug!("No mock response for {} {}", method, url);
                MockResponse::status(404)
            }
        };

        let latency = match options.timeout {
            Some(timeout) if timeout < mock.latency => {
                tokio::time::sleep(timeout).await;
                return HttpResponse::transport_error("request timed out", start.elapsed());
            }
            _ => mock.latency,
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        HttpResponse {
            status: mock.status,
            body: mock.body,
            duration: start.elapsed(),
            error: mock.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_mock_routes_and_latency() {
        let client = MockHttpClient::new().mock(
            HttpMethod::Get,
            "http://test.local/",
            MockResponse::ok("hello").with_latency(Duration::from_millis(50)),
        );

        let response = client
            .request(HttpMethod::Get, "http://test.local/", RequestOptions::new())
            .await;
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "hello");
        assert_eq!(response.duration, Duration::from_millis(50));
        assert!(!response.is_failed());

        let missing = client
            .request(HttpMethod::Post, "http://test.local/", RequestOptions::new())
            .await;
        assert_eq!(missing.status, 404);
        assert!(missing.is_failed());
        assert_eq!(client.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_timeout() {
        let client = MockHttpClient::with_responder(|_, _, _| {
            MockResponse::ok("slow").with_latency(Duration::from_secs(10))
        });

        let response = client
            .request(
                HttpMethod::Get,
                "/slow",
                RequestOptions::new().timeout(Duration::from_secs(1)),
            )
            .await;
        assert!(response.is_failed());
        assert_eq!(response.status, 0);
        assert_eq!(response.duration, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_reqwest_client_reports_transport_errors() {
        let client = ReqwestClient::new(ClientConfig {
            timeout: Duration::from_millis(500),
            ..ClientConfig::default()
        })
        .unwrap();

        // Nothing answers HTTP on the discard port.
        let response = client
            .request(HttpMethod::Get, "http://127.0.0.1:9/", RequestOptions::new())
            .await;
        assert!(response.is_failed());
        assert!(response.error.is_some());
    }

    #[tokio::test]
    async fn test_reqwest_client_rejects_bad_headers() {
        let client = ReqwestClient::new(ClientConfig::default()).unwrap();
        let response = client
            .request(
                HttpMethod::Get,
                "http://127.0.0.1:9/",
                RequestOptions::new().header("bad header", "x"),
            )
            .await;
        assert!(response
            .error
            .as_deref()
            .is_some_and(|e| e.contains("Invalid header")));
    }
}
