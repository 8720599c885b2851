//! Shared library for cross-cutting concerns in agent-platform Rust services.
//!
//! This crate provides centralized implementations for:
//! - Outbound HTTP client configuration suited to long-lived streams
//! - Structured logging bootstrap
//! - Redaction of sensitive material from user-visible messages

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod http;
pub mod sanitize;
pub mod tracing_config;

pub use http::{build_http_client, HttpConfig};
pub use sanitize::{contains_sensitive_info, looks_like_key_material, sanitize_message, REDACTED};
pub use tracing_config::{init_tracing, LogFormat, TracingConfig};
