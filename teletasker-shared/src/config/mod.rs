//! # Configuration
//!
//! Layered client configuration: defaults, an optional file, `TELETASKER_*`
//! environment variables and command-line overrides.

pub mod client;

pub use client::{Config, ConfigError, ConfigFormat, ConfigOverrides, RetryConfig, SyncConfig};
