//! Logging setup for Volley
//!
//! Every Volley crate logs through `tracing`. This crate installs the
//! global subscriber an embedding application wants, driven by
//! [`volley_config::LoggingConfig`].

pub mod init;

pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing};
pub use volley_config::{LogFormat, LogLevel, LoggingConfig};
