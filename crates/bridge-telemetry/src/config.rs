//! Telemetry configuration from environment variables.

use std::env;

/// Logging configuration for a bridge process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line
    pub service_name: String,

    /// Filter directive (trace, debug, info, warn, error or a full EnvFilter string)
    pub log_level: String,

    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,

    /// ANSI colours in human-readable output
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "module-bridge".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BRIDGE_SERVICE_NAME`: Service name (default: module-bridge)
    /// - `BRIDGE_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `BRIDGE_JSON_LOGS`: JSON output (default: false in dev, true in containers)
    /// - `NO_COLOR`: disables ANSI colours when set
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("BRIDGE_SERVICE_NAME")
                .unwrap_or_else(|_| "module-bridge".to_string()),

            log_level: env::var("BRIDGE_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            json_logs: env::var("BRIDGE_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(is_container),

            ansi: env::var("NO_COLOR").is_err(),
        }
    }

    /// Configuration for a named component, e.g. `bridge-node`.
    pub fn for_service(name: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = name.to_string();
        config
    }

    /// The stdio child must never colour its stderr: the parent captures it
    /// into error messages.
    #[must_use]
    pub fn without_ansi(mut self) -> Self {
        self.ansi = false;
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}
