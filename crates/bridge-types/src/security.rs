//! # Tenant Call Authentication
//!
//! The **single, authoritative implementation** of L4 request signing and
//! verification. Both the `TenantEmitter` (signing side) and the bridge
//! handler (verifying side) go through this module.
//!
//! ## Security Properties
//!
//! - **HMAC-SHA256 Signatures** over `tenantId:timestamp:body`
//!   (`tenantId:timestamp:nonce:body` when nonces are enabled)
//! - **Time-Bounded Validity**: `|now - timestamp| > window` is rejected
//!   before the signature is even looked at
//! - **Constant-Time Compare**: via `Mac::verify_slice`
//! - **Rotation**: a tenant's previous secret is accepted until its overlap
//!   deadline passes
//! - **Optional Replay Dedup**: nonces are remembered for a bounded TTL

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::errors::CallError;

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default freshness window (seconds) on either side of `now`.
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Minimum accepted secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Default nonce retention (2x the default window).
pub const DEFAULT_NONCE_TTL_SECS: u64 = 120;

/// Maximum nonce cache size before forced cleanup.
pub const MAX_NONCE_CACHE_SIZE: usize = 100_000;

/// Caller tenant header.
pub const HEADER_TENANT_ID: &str = "x-tenant-id";
/// Unix-seconds timestamp header.
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
/// Hex HMAC-SHA256 header.
pub const HEADER_SIGNATURE: &str = "x-signature";
/// UUID nonce header (nonce mode only).
pub const HEADER_NONCE: &str = "x-nonce";

/// Message returned for every signature mismatch, unknown tenant included.
pub const INVALID_SIGNATURE: &str = "Invalid signature";

// =============================================================================
// SECRETS
// =============================================================================

/// Errors constructing secrets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecretError {
    #[error("secret must be at least {MIN_SECRET_LEN} bytes, got {0}")]
    TooShort(usize),

    #[error("secret is not valid hex: {0}")]
    InvalidHex(String),
}

/// A symmetric key of at least [`MIN_SECRET_LEN`] bytes, wiped on drop.
#[derive(Clone)]
pub struct Secret(Zeroizing<Vec<u8>>);

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Result<Self, SecretError> {
        if bytes.len() < MIN_SECRET_LEN {
            return Err(SecretError::TooShort(bytes.len()));
        }
        Ok(Self(Zeroizing::new(bytes)))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, SecretError> {
        let bytes =
            hex::decode(hex_str.trim()).map_err(|e| SecretError::InvalidHex(e.to_string()))?;
        Self::new(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<{} bytes redacted>)", self.0.len())
    }
}

/// Secret material for one tenant pair, with optional rotation overlap.
#[derive(Debug, Clone)]
pub struct TenantSecrets {
    /// The secret new requests are signed with.
    pub current: Secret,
    /// The retiring secret and the unix time its acceptance ends.
    pub previous: Option<(Secret, u64)>,
}

impl TenantSecrets {
    pub fn new(current: Secret) -> Self {
        Self {
            current,
            previous: None,
        }
    }

    /// Accept `previous` alongside `current` until `overlap_until`.
    #[must_use]
    pub fn rotating_from(mut self, previous: Secret, overlap_until: u64) -> Self {
        self.previous = Some((previous, overlap_until));
        self
    }

    /// Secrets acceptable at `now`, current first.
    pub fn accepted_at(&self, now: u64) -> impl Iterator<Item = &Secret> {
        let previous = self
            .previous
            .as_ref()
            .filter(|(_, until)| now <= *until)
            .map(|(secret, _)| secret);
        std::iter::once(&self.current).chain(previous)
    }
}

/// Lookup of per-tenant secrets, loaded once at bootstrap.
///
/// Implementations might:
/// - Read keys from the node configuration file
/// - Query an external secret manager at startup
pub trait SecretStore: Send + Sync {
    /// Secrets for a tenant, or `None` if the tenant is unknown.
    fn get(&self, tenant_id: &str) -> Option<Arc<TenantSecrets>>;
}

/// In-memory secret store; immutable once shared.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    tenants: HashMap<String, Arc<TenantSecrets>>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>, secrets: TenantSecrets) -> Self {
        self.insert(tenant_id, secrets);
        self
    }

    pub fn insert(&mut self, tenant_id: impl Into<String>, secrets: TenantSecrets) {
        self.tenants.insert(tenant_id.into(), Arc::new(secrets));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

impl SecretStore for StaticSecretStore {
    fn get(&self, tenant_id: &str) -> Option<Arc<TenantSecrets>> {
        self.tenants.get(tenant_id).cloned()
    }
}

// =============================================================================
// SIGNING
// =============================================================================

/// How replays inside the freshness window are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayMode {
    /// Freshness window only.
    #[default]
    #[serde(rename = "timestamp")]
    TimestampOnly,
    /// Freshness window plus single-use nonces.
    #[serde(rename = "timestamp_nonce")]
    TimestampAndNonce,
}

/// The bytes that get signed.
#[derive(Debug, Clone, Copy)]
pub struct SigningContext<'a> {
    pub tenant_id: &'a str,
    pub timestamp: u64,
    pub nonce: Option<&'a str>,
    pub body: &'a [u8],
}

impl SigningContext<'_> {
    /// `tenantId:timestamp:body`, or `tenantId:timestamp:nonce:body`.
    #[must_use]
    pub fn signing_bytes(&self) -> Vec<u8> {
        let ts = self.timestamp.to_string();
        let nonce_len = self.nonce.map_or(0, |n| n.len() + 1);
        let mut out =
            Vec::with_capacity(self.tenant_id.len() + ts.len() + nonce_len + self.body.len() + 2);
        out.extend_from_slice(self.tenant_id.as_bytes());
        out.push(b':');
        out.extend_from_slice(ts.as_bytes());
        out.push(b':');
        if let Some(nonce) = self.nonce {
            out.extend_from_slice(nonce.as_bytes());
            out.push(b':');
        }
        out.extend_from_slice(self.body);
        out
    }
}

/// Compute the lowercase-hex HMAC-SHA256 of a signing context.
pub fn sign(secret: &Secret, ctx: &SigningContext<'_>) -> String {
    hex::encode(mac_for(secret, ctx).finalize().into_bytes())
}

/// Constant-time check of a hex signature against one secret.
pub fn verify_signature(secret: &Secret, ctx: &SigningContext<'_>, signature_hex: &str) -> bool {
    let Ok(provided) = hex::decode(signature_hex) else {
        return false;
    };
    mac_for(secret, ctx).verify_slice(&provided).is_ok()
}

fn mac_for(secret: &Secret, ctx: &SigningContext<'_>) -> HmacSha256 {
    // HMAC accepts keys of any length; Secret guarantees >= 32 bytes anyway.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any size"));
    mac.update(&ctx.signing_bytes());
    mac
}

/// Headers the caller attaches to an L4 request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub tenant_id: String,
    pub timestamp: u64,
    pub signature: String,
    pub nonce: Option<String>,
}

/// Caller-side signer bound to one tenant identity.
#[derive(Debug, Clone)]
pub struct Signer {
    tenant_id: String,
    secret: Secret,
    replay: ReplayMode,
}

impl Signer {
    pub fn new(tenant_id: impl Into<String>, secret: Secret, replay: ReplayMode) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            secret,
            replay,
        }
    }

    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Sign `body` as of `now`. A fresh nonce is minted in nonce mode.
    #[must_use]
    pub fn sign(&self, body: &[u8], now: u64) -> SignedHeaders {
        let nonce = match self.replay {
            ReplayMode::TimestampOnly => None,
            ReplayMode::TimestampAndNonce => Some(Uuid::new_v4().to_string()),
        };
        let ctx = SigningContext {
            tenant_id: &self.tenant_id,
            timestamp: now,
            nonce: nonce.as_deref(),
            body,
        };
        SignedHeaders {
            tenant_id: self.tenant_id.clone(),
            timestamp: now,
            signature: sign(&self.secret, &ctx),
            nonce,
        }
    }
}

// =============================================================================
// TIMESTAMP VALIDATION
// =============================================================================

/// Returns the current Unix timestamp, or 0 if the clock is before the epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// `|now - timestamp| <= window`.
#[must_use]
pub fn is_fresh(timestamp: u64, now: u64, window_secs: u64) -> bool {
    timestamp.abs_diff(now) <= window_secs
}

// =============================================================================
// NONCE CACHE
// =============================================================================

/// Thread-safe, TTL-bounded set of seen nonces.
///
/// Expired entries are swept when the cache reaches its size bound.
#[derive(Debug)]
pub struct NonceCache {
    /// nonce -> unix second after which it may be forgotten
    cache: Mutex<HashMap<Uuid, u64>>,
    ttl_secs: u64,
    max_entries: usize,
}

impl NonceCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self::with_capacity_limit(ttl_secs, MAX_NONCE_CACHE_SIZE)
    }

    pub fn with_capacity_limit(ttl_secs: u64, max_entries: usize) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            ttl_secs,
            max_entries,
        }
    }

    /// Returns `true` if the nonce is fresh and records it; `false` on replay
    /// or when the cache is full of live entries.
    ///
    /// `fresh_until` is the last second at which the carrying request still
    /// passes the freshness window. The nonce is remembered at least that
    /// long, whatever the TTL.
    pub fn check_and_insert(&self, nonce: Uuid, now: u64, fresh_until: u64) -> bool {
        let mut cache = self.cache.lock();

        if cache.len() >= self.max_entries {
            cache.retain(|_, expiry| *expiry > now);
            if cache.len() >= self.max_entries {
                warn!(entries = cache.len(), "Nonce cache saturated, rejecting");
                return false;
            }
        }

        if let Some(&expiry) = cache.get(&nonce) {
            if expiry > now {
                return false;
            }
        }

        let expiry = now
            .saturating_add(self.ttl_secs)
            .max(fresh_until.saturating_add(1));
        cache.insert(nonce, expiry);
        true
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NonceCache {
    fn default() -> Self {
        Self::new(DEFAULT_NONCE_TTL_SECS)
    }
}

// =============================================================================
// VERIFIER
// =============================================================================

/// Why an L4 request failed authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Malformed timestamp")]
    MalformedTimestamp,

    #[error("Request expired")]
    Expired { timestamp: u64, now: u64 },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed nonce")]
    MalformedNonce,

    #[error("Replay detected")]
    Replay,
}

impl From<AuthFailure> for CallError {
    fn from(failure: AuthFailure) -> Self {
        CallError::auth(failure.to_string())
    }
}

/// Raw header values as received, before any parsing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthHeaders<'a> {
    pub tenant_id: Option<&'a str>,
    pub timestamp: Option<&'a str>,
    pub signature: Option<&'a str>,
    pub nonce: Option<&'a str>,
}

/// Callee-side verifier.
///
/// ## Verification Steps (in order)
///
/// 1. **Headers present**
/// 2. **Timestamp window** (before any signature work)
/// 3. **Signature** against current, then previous secret during rotation
/// 4. **Nonce** (nonce mode only, after the signature so forged requests
///    cannot burn legitimate nonces)
pub struct Authenticator {
    secrets: Arc<dyn SecretStore>,
    window_secs: u64,
    replay: ReplayMode,
    nonces: NonceCache,
}

impl Authenticator {
    pub fn new(secrets: Arc<dyn SecretStore>, window_secs: u64, replay: ReplayMode) -> Self {
        Self {
            secrets,
            window_secs,
            replay,
            nonces: NonceCache::new(window_secs.saturating_mul(2)),
        }
    }

    #[must_use]
    pub fn with_nonce_cache(mut self, nonces: NonceCache) -> Self {
        self.nonces = nonces;
        self
    }

    #[must_use]
    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    #[must_use]
    pub fn replay_mode(&self) -> ReplayMode {
        self.replay
    }

    /// Verify a request. Returns the authenticated tenant id.
    pub fn verify<'a>(
        &self,
        headers: &AuthHeaders<'a>,
        body: &[u8],
        now: u64,
    ) -> Result<&'a str, AuthFailure> {
        let tenant_id = headers
            .tenant_id
            .filter(|t| !t.is_empty())
            .ok_or(AuthFailure::MissingHeader(HEADER_TENANT_ID))?;
        let raw_ts = headers
            .timestamp
            .ok_or(AuthFailure::MissingHeader(HEADER_TIMESTAMP))?;
        let signature = headers
            .signature
            .ok_or(AuthFailure::MissingHeader(HEADER_SIGNATURE))?;

        let timestamp: u64 = raw_ts
            .trim()
            .parse()
            .map_err(|_| AuthFailure::MalformedTimestamp)?;
        if !is_fresh(timestamp, now, self.window_secs) {
            return Err(AuthFailure::Expired { timestamp, now });
        }

        let nonce = match self.replay {
            ReplayMode::TimestampOnly => None,
            ReplayMode::TimestampAndNonce => {
                let raw = headers
                    .nonce
                    .ok_or(AuthFailure::MissingHeader(HEADER_NONCE))?;
                let parsed = Uuid::parse_str(raw).map_err(|_| AuthFailure::MalformedNonce)?;
                Some((raw, parsed))
            }
        };

        let secrets = self
            .secrets
            .get(tenant_id)
            .ok_or(AuthFailure::InvalidSignature)?;
        let ctx = SigningContext {
            tenant_id,
            timestamp,
            nonce: nonce.map(|(raw, _)| raw),
            body,
        };
        let matched = secrets
            .accepted_at(now)
            .any(|secret| verify_signature(secret, &ctx, signature));
        if !matched {
            return Err(AuthFailure::InvalidSignature);
        }

        if let Some((_, parsed)) = nonce {
            let fresh_until = timestamp.saturating_add(self.window_secs);
            if !self.nonces.check_and_insert(parsed, now, fresh_until) {
                return Err(AuthFailure::Replay);
            }
        }

        Ok(tenant_id)
    }
}

// =============================================================================
// TESTS
// =============================================================================
