//! Transport configuration sections.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default request body ceiling for the L4 endpoint (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Default L4 listen port.
pub const DEFAULT_PORT: u16 = 8470;

/// L4 endpoint listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address. Loopback by default; exposure beyond the trusted
    /// network is the reverse proxy's job.
    pub bind: SocketAddr,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_PORT),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Opt-in bounded retry for L4 calls.
///
/// `max_attempts = 1` (the default) means no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each time after.
    #[serde(with = "humantime_serde")]
    pub base_backoff: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: Duration::from_millis(100),
        }
    }

    #[must_use]
    pub const fn bounded(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts,
            base_backoff,
        }
    }

    /// Delay before attempt `attempt` (1-based; attempt 1 has none).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let shift = (attempt - 2).min(16);
        self.base_backoff.saturating_mul(1 << shift)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// L4 client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Whole-request deadline, connect included.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub pool_max_idle_per_host: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::none(),
            pool_max_idle_per_host: 8,
        }
    }
}

/// L2 client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StdioConfig {
    /// Executable serving one call per process.
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Extra environment for the child, on top of the inherited one.
    pub env: BTreeMap<String, String>,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("bridge-node"),
            args: vec!["stdio".to_string()],
            env: BTreeMap::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Transport configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportConfigError {
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), TransportConfigError> {
        if self.max_body_bytes == 0 {
            return Err(TransportConfigError::InvalidLimit(
                "max_body_bytes cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), TransportConfigError> {
        if self.connect_timeout.is_zero() {
            return Err(TransportConfigError::InvalidTimeout(
                "connect_timeout cannot be 0".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(TransportConfigError::InvalidTimeout(
                "timeout cannot be 0".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(TransportConfigError::InvalidLimit(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl StdioConfig {
    pub fn validate(&self) -> Result<(), TransportConfigError> {
        if self.timeout.is_zero() {
            return Err(TransportConfigError::InvalidTimeout(
                "stdio timeout cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

/// Durations as `"10s"`, `"500ms"`, `"2m"` or bare seconds.
pub mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let ms = duration.as_millis();
        if ms % 1000 == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{ms}ms"))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // `ms` before `s`: "500ms" also ends in 's'.
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m.saturating_mul(60)))
                .map_err(|_| "invalid minutes")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
