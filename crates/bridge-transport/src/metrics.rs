//! Bridge endpoint counters, served as JSON on the bridge listener.

use bridge_types::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};

/// L4 endpoint metrics.
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    pub requests_total: AtomicU64,
    pub ok: AtomicU64,
    pub validation: AtomicU64,
    pub auth: AtomicU64,
    pub permission: AtomicU64,
    pub not_found: AtomicU64,
    pub handler: AtomicU64,
    pub other: AtomicU64,
    /// Subset of `auth`: nonces seen twice.
    pub replays: AtomicU64,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one request.
    pub fn record(&self, outcome: Result<(), ErrorKind>) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Ok(()) => &self.ok,
            Err(ErrorKind::ValidationError) => &self.validation,
            Err(ErrorKind::AuthError) => &self.auth,
            Err(ErrorKind::PermissionError) => &self.permission,
            Err(ErrorKind::NotFoundError) => &self.not_found,
            Err(ErrorKind::HandlerError) => &self.handler,
            Err(ErrorKind::TransportError | ErrorKind::TimeoutError) => &self.other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "requests": {
                "total": self.requests_total.load(Ordering::Relaxed),
                "ok": self.ok.load(Ordering::Relaxed),
            },
            "rejected": {
                "validation": self.validation.load(Ordering::Relaxed),
                "auth": self.auth.load(Ordering::Relaxed),
                "permission": self.permission.load(Ordering::Relaxed),
                "not_found": self.not_found.load(Ordering::Relaxed),
                "replays": self.replays.load(Ordering::Relaxed),
            },
            "failed": {
                "handler": self.handler.load(Ordering::Relaxed),
                "other": self.other.load(Ordering::Relaxed),
            }
        })
    }
}
