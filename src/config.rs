//! Configuration module for the body modification filter
//!
//! Configuration is loaded from Envoy plugin configuration,
//! NOT from external files. This avoids file I/O in the Wasm sandbox.

use serde::Deserialize;

/// Default name of the control header carrying the instruction list
pub const DEFAULT_CONTROL_HEADER: &str = "x-body-modification";

/// Which message body the decoded plan is applied to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyTarget {
    /// Edit the request body before it reaches the upstream
    Request,
    /// Edit the response body before it reaches the client
    Response,
}

impl BodyTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyTarget::Request => "request",
            BodyTarget::Response => "response",
        }
    }
}

/// Filter configuration loaded from Envoy plugin configuration
#[derive(Clone, Debug, Deserialize)]
pub struct FilterConfig {
    /// Request header carrying the JSON instruction list
    #[serde(default = "default_control_header")]
    pub control_header: String,

    /// Body the plan edits (the plan itself always comes from the request)
    #[serde(default = "default_target")]
    pub target: BodyTarget,

    /// Maximum body size to buffer (prevent OOM)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Whether to debug-log every decoded operation
    #[serde(default = "default_log_operations")]
    pub log_operations: bool,
}

fn default_control_header() -> String {
    DEFAULT_CONTROL_HEADER.to_string()
}

fn default_target() -> BodyTarget {
    BodyTarget::Request
}

fn default_max_body_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_log_operations() -> bool {
    true
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            control_header: default_control_header(),
            target: default_target(),
            max_body_size: default_max_body_size(),
            log_operations: default_log_operations(),
        }
    }
}

impl FilterConfig {
    /// Parse configuration from JSON bytes (from Envoy plugin configuration)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config_str =
            std::str::from_utf8(bytes).map_err(|e| ConfigError::InvalidUtf8(e.to_string()))?;

        let mut config: FilterConfig =
            serde_json::from_str(config_str).map_err(|e| ConfigError::InvalidJson(e.to_string()))?;

        // Header maps are lowercase on the wire
        config.control_header = config.control_header.to_ascii_lowercase();
        if config.control_header.is_empty() {
            config.control_header = default_control_header();
        }

        Ok(config)
    }
}

/// Configuration parsing errors
#[derive(Debug)]
pub enum ConfigError {
    InvalidUtf8(String),
    InvalidJson(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidUtf8(e) => write!(f, "Invalid UTF-8: {}", e),
            ConfigError::InvalidJson(e) => write!(f, "Invalid JSON: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
