//! Configuration Module
//!
//! Environment-based configuration for the quote proxy.

mod settings;

pub use settings::{ConfigError, FanoutSettings, ProxyConfig, ServerSettings, UpstreamSettings};
