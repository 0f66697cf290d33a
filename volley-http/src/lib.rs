//! HTTP collaborator for Volley workloads
//!
//! The engine only depends on the [`HttpClient`] contract: issue a request,
//! get back a status, body, duration and optional transport error. A
//! `reqwest` adapter is provided for real targets and an in-memory mock for
//! tests and dry runs.

pub mod client;
pub mod config;
pub mod errors;
pub mod types;

pub use client::{HttpClient, MockHttpClient, MockResponse, ReqwestClient};
pub use config::ClientConfig;
pub use errors::HttpError;
pub use types::{HttpMethod, HttpMethodError, HttpResponse, RequestOptions};
