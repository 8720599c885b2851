//! Shared test utilities for agent-platform Rust services.
//!
//! This crate provides:
//! - Proptest generators for tenant claims, session ids and prompts
//! - Fixtures for runtime ARNs, environment maps and credential authority responses

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

pub use fixtures::*;
pub use generators::*;
