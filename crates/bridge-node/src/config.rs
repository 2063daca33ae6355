//! # Node Configuration
//!
//! One TOML file (path in `BRIDGE_CONFIG`), every section optional, then
//! environment overrides on top.
//!
//! ```toml
//! [node]
//! dist = "acme"
//! mode = "network"
//!
//! [server]
//! bind = "127.0.0.1:8470"
//! max_body_bytes = 1048576
//!
//! [security]
//! window_secs = 60
//! replay = "timestamp_nonce"
//! nonce_ttl = "2m"
//!
//! [security.tenants.globex]
//! secret = "<64+ hex chars>"
//! previous = "<64+ hex chars>"
//! overlap_until = 1767225600
//!
//! [gates.defaults]
//! tenant = "deny"
//!
//! [gates.modules.core]
//! tenant = "allow"
//! ```
//!
//! ## Security Requirements
//!
//! - Every tenant secret decodes to at least 32 bytes
//! - The freshness window is never zero

use bridge_registry::{ExecutionMode, GatePolicy};
use bridge_transport::config::humantime_serde;
use bridge_transport::{ClientConfig, ServerConfig, StdioConfig, TransportConfigError};
use bridge_types::{
    Authenticator, NonceCache, ReplayMode, Secret, SecretError, StaticSecretStore,
    TenantSecrets, DEFAULT_NONCE_TTL_SECS, DEFAULT_WINDOW_SECS, MAX_NONCE_CACHE_SIZE,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Path of the TOML file.
pub const CONFIG_PATH_ENV: &str = "BRIDGE_CONFIG";
/// Overrides `server.bind`.
pub const BIND_ENV: &str = "BRIDGE_BIND";
/// Overrides `node.dist`.
pub const DIST_ENV: &str = "BRIDGE_DIST";
/// Overrides `security.window_secs`.
pub const WINDOW_ENV: &str = "BRIDGE_WINDOW_SECS";
/// Prefix for per-tenant secrets, e.g. `BRIDGE_TENANT_SECRET_GLOBEX`.
/// The suffix is lowercased to form the tenant id.
pub const TENANT_SECRET_PREFIX: &str = "BRIDGE_TENANT_SECRET_";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<TransportConfigError> for ConfigError {
    fn from(e: TransportConfigError) -> Self {
        Self::Invalid(e.to_string())
    }
}

/// Complete node configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node: NodeSection,
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub gates: GatePolicy,
    pub client: ClientConfig,
    pub stdio: StdioConfig,
}

/// Identity of the hosted distributor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    pub dist: String,
    pub mode: ExecutionMode,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            dist: "local".to_string(),
            mode: ExecutionMode::Network,
        }
    }
}

/// L4 authentication settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Freshness window in seconds.
    pub window_secs: u64,
    pub replay: ReplayMode,
    /// How long a seen nonce is remembered.
    #[serde(with = "humantime_serde")]
    pub nonce_ttl: Duration,
    pub max_nonces: usize,
    /// Keyed by tenant id.
    pub tenants: BTreeMap<String, TenantSecretConfig>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            window_secs: DEFAULT_WINDOW_SECS,
            replay: ReplayMode::TimestampOnly,
            nonce_ttl: Duration::from_secs(DEFAULT_NONCE_TTL_SECS),
            max_nonces: MAX_NONCE_CACHE_SIZE,
            tenants: BTreeMap::new(),
        }
    }
}

/// Hex-encoded tenant secret with optional rotation predecessor.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct TenantSecretConfig {
    pub secret: String,
    pub previous: Option<String>,
    /// Unix seconds after which `previous` stops verifying.
    pub overlap_until: Option<u64>,
}

impl fmt::Debug for TenantSecretConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantSecretConfig")
            .field("secret", &"<redacted>")
            .field("previous", &self.previous.as_ref().map(|_| "<redacted>"))
            .field("overlap_until", &self.overlap_until)
            .finish()
    }
}

impl TenantSecretConfig {
    fn decode(&self, tenant: &str) -> Result<TenantSecrets, ConfigError> {
        let invalid = |field: &str, e: SecretError| {
            ConfigError::Invalid(format!("tenant '{tenant}' {field}: {e}"))
        };

        let current = Secret::from_hex(&self.secret).map_err(|e| invalid("secret", e))?;
        let mut secrets = TenantSecrets::new(current);

        match (&self.previous, self.overlap_until) {
            (Some(previous), Some(until)) => {
                let previous = Secret::from_hex(previous).map_err(|e| invalid("previous", e))?;
                secrets = secrets.rotating_from(previous, until);
            }
            (Some(_), None) => {
                return Err(ConfigError::Invalid(format!(
                    "tenant '{tenant}': previous secret needs overlap_until"
                )));
            }
            (None, _) => {}
        }
        Ok(secrets)
    }
}

impl NodeConfig {
    /// Load from `BRIDGE_CONFIG` (defaults if unset), apply environment
    /// overrides, validate.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse one TOML file without overrides or validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `BRIDGE_*` overrides from `vars`. Unrelated variables are ignored.
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                BIND_ENV => {
                    self.server.bind = value.parse().map_err(|_| {
                        ConfigError::Invalid(format!("{BIND_ENV}: '{value}' is not a socket address"))
                    })?;
                }
                DIST_ENV => self.node.dist = value,
                WINDOW_ENV => {
                    self.security.window_secs = value.parse().map_err(|_| {
                        ConfigError::Invalid(format!("{WINDOW_ENV}: '{value}' is not a number"))
                    })?;
                }
                _ => {
                    if let Some(tenant) = key.strip_prefix(TENANT_SECRET_PREFIX) {
                        if tenant.is_empty() {
                            continue;
                        }
                        let entry = self
                            .security
                            .tenants
                            .entry(tenant.to_ascii_lowercase())
                            .or_default();
                        entry.secret = value;
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate for serving.
    pub fn validate(&self) -> Result<(), ConfigError> {
        bridge_types::validate_segment("dist", &self.node.dist)
            .map_err(|e| ConfigError::Invalid(e.message))?;

        if self.security.window_secs == 0 {
            return Err(ConfigError::Invalid("window_secs cannot be 0".into()));
        }
        if self.security.replay == ReplayMode::TimestampAndNonce {
            // A timestamp may sit up to one window in the future, so a
            // request stays fresh for two windows after it first arrives.
            if self.security.nonce_ttl.as_secs() < self.security.window_secs.saturating_mul(2) {
                return Err(ConfigError::Invalid(
                    "nonce_ttl must cover twice the freshness window".into(),
                ));
            }
            if self.security.max_nonces == 0 {
                return Err(ConfigError::Invalid("max_nonces cannot be 0".into()));
            }
        }

        self.server.validate()?;
        self.client.validate()?;
        self.stdio.validate()?;

        for (tenant, secrets) in &self.security.tenants {
            secrets.decode(tenant)?;
        }
        Ok(())
    }

    /// Decode every configured tenant into a secret store.
    pub fn secret_store(&self) -> Result<StaticSecretStore, ConfigError> {
        let mut store = StaticSecretStore::new();
        for (tenant, secrets) in &self.security.tenants {
            store.insert(tenant.clone(), secrets.decode(tenant)?);
        }
        Ok(store)
    }

    /// The L4 verifier for this node.
    pub fn authenticator(&self) -> Result<Authenticator, ConfigError> {
        let store = Arc::new(self.secret_store()?);
        let auth = Authenticator::new(store, self.security.window_secs, self.security.replay);
        Ok(match self.security.replay {
            ReplayMode::TimestampOnly => auth,
            ReplayMode::TimestampAndNonce => auth.with_nonce_cache(NonceCache::with_capacity_limit(
                self.security.nonce_ttl.as_secs(),
                self.security.max_nonces,
            )),
        })
    }
}
