//! # L4 Callee: Bridge Handler
//!
//! ## Processing Order
//!
//! 1. Parse body as a JSON object with the four request fields (400)
//! 2. Identifier grammar and argument shape (400)
//! 3. Timestamp window (401 envelope, HTTP 403)
//! 4. HMAC, constant-time (401 envelope, HTTP 403)
//! 5. Nonce, when enabled (401 envelope, HTTP 403)
//! 6. Outer `on_tenant_call` gate (403)
//! 7. `execute_bridge`: inner `on_bridge_call` gate, lookup, handler
//!
//! The inner gate sees the caller as `tenant:<tenant_id>`. The colon is
//! outside the dist grammar, so a hook that admits its own dist code never
//! admits a tenant by accident.
//!
//! Nothing after a failed step runs. Handler failures come back as 500
//! envelopes; the process and its connections stay healthy.

use axum::http::{HeaderMap, StatusCode};
use bridge_registry::{BridgeCall, DistributorDirectory, Tier};
use bridge_types::{
    current_timestamp, AuthFailure, AuthHeaders, Authenticator, CallError, CallResult, Envelope,
    ErrorKind, ModuleIdentity, Request, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TENANT_ID,
    HEADER_TIMESTAMP,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::metrics::BridgeMetrics;

/// Prefix of the source a tenant call presents to `on_bridge_call`.
pub const TENANT_SOURCE_PREFIX: &str = "tenant:";

/// Verifies, gates and dispatches L4 requests.
pub struct BridgeHandler {
    directory: Arc<dyn DistributorDirectory>,
    authenticator: Arc<Authenticator>,
    metrics: Arc<BridgeMetrics>,
}

impl BridgeHandler {
    pub fn new(
        directory: Arc<dyn DistributorDirectory>,
        authenticator: Arc<Authenticator>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            directory,
            authenticator,
            metrics,
        }
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<BridgeMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Handle one request at the current time.
    pub async fn handle(&self, headers: &HeaderMap, body: &[u8]) -> (StatusCode, Envelope) {
        self.handle_at(headers, body, current_timestamp()).await
    }

    /// Handle one request as of `now` (unix seconds).
    pub async fn handle_at(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        now: u64,
    ) -> (StatusCode, Envelope) {
        let result = self.process(headers, body, now).await;
        self.metrics.record(result.as_ref().map(|_| ()).map_err(|e| e.kind));
        let status = status_for(&result);
        (status, Envelope::from_result(result))
    }

    /// Envelope for a body the listener refused to buffer. Counted as a
    /// validation failure; the request never reaches authentication.
    pub fn reject_oversized(&self) -> Envelope {
        let err = CallError::validation("request body too large");
        self.metrics.record(Err(err.kind));
        warn!("Tenant call rejected: body over limit");
        Envelope::from_error(&err)
    }

    async fn process(&self, headers: &HeaderMap, body: &[u8], now: u64) -> CallResult {
        let request = Request::parse(body)?;
        request.validate()?;

        let auth = AuthHeaders {
            tenant_id: header(headers, HEADER_TENANT_ID),
            timestamp: header(headers, HEADER_TIMESTAMP),
            signature: header(headers, HEADER_SIGNATURE),
            nonce: header(headers, HEADER_NONCE),
        };
        let tenant_id = match self.authenticator.verify(&auth, body, now) {
            Ok(tenant_id) => tenant_id.to_string(),
            Err(failure) => {
                if failure == AuthFailure::Replay {
                    self.metrics.record_replay();
                }
                warn!(
                    tenant_id = auth.tenant_id.unwrap_or("-"),
                    dist = %request.dist,
                    module = %request.module,
                    command = %request.command,
                    reason = ?failure,
                    "Tenant call rejected"
                );
                return Err(failure.into());
            }
        };

        let distributor = self.directory.resolve(&request.dist).ok_or_else(|| {
            CallError::not_found(format!("distributor '{}' not found", request.dist))
        })?;
        let registry = distributor.snapshot();

        let target = ModuleIdentity::new(request.dist.clone(), request.module.clone());
        let decision = registry.gates().decide_tenant(
            &target,
            registry.hooks(&request.module),
            &tenant_id,
            &request.command,
        );
        if !decision.is_allow() {
            warn!(
                tenant_id = %tenant_id,
                target = %target,
                command = %request.command,
                "Tenant call denied by gate"
            );
            return Err(CallError::permission_denied(format!(
                "tenant '{tenant_id}' may not call '{}' on {target}",
                request.command
            )));
        }

        debug!(tenant_id = %tenant_id, target = %target, command = %request.command, "Tenant call admitted");

        let source = format!("{TENANT_SOURCE_PREFIX}{tenant_id}");
        // Handlers are synchronous and may block; keep them off the reactor.
        tokio::task::spawn_blocking(move || {
            registry.execute_bridge(BridgeCall {
                source_dist: &source,
                module: &request.module,
                command: &request.command,
                args: &request.args,
                origin: Tier::Tenant,
            })
        })
        .await
        .map_err(|e| CallError::handler(format!("dispatch task failed: {e}")))?
    }
}

impl std::fmt::Debug for BridgeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHandler").finish_non_exhaustive()
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// HTTP status for an outcome: the envelope code, except auth failures,
/// which are indistinguishable from permission denials on the wire.
fn status_for(result: &CallResult) -> StatusCode {
    match result {
        Ok(_) => StatusCode::OK,
        Err(e) if e.kind == ErrorKind::AuthError => StatusCode::FORBIDDEN,
        Err(e) => StatusCode::from_u16(e.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    }
}
