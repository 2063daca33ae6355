//! # L4 Caller: TenantEmitter
//!
//! Serializes a request, signs it, POSTs it to a remote bridge endpoint and
//! unwraps the envelope. One `reqwest::Client` per emitter, so repeated calls
//! reuse pooled connections.

use bridge_types::{
    current_timestamp, CallError, CallResult, Envelope, Request, Signer, HEADER_NONCE,
    HEADER_SIGNATURE, HEADER_TENANT_ID, HEADER_TIMESTAMP,
};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;

/// Signed HTTP caller bound to one tenant identity and one remote endpoint.
#[derive(Debug, Clone)]
pub struct TenantEmitter {
    client: reqwest::Client,
    endpoint: String,
    signer: Signer,
    config: ClientConfig,
}

impl TenantEmitter {
    /// `endpoint` is the full URL of the remote bridge path.
    pub fn new(
        endpoint: impl Into<String>,
        signer: Signer,
        config: ClientConfig,
    ) -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| CallError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            signer,
            config,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Call `dist::module.command(args)` on the remote side.
    pub async fn call(
        &self,
        dist: &str,
        module: &str,
        command: &str,
        args: Vec<Value>,
    ) -> CallResult {
        self.send(&Request::new(dist, module, command, args)).await
    }

    /// Send a prepared request, retrying per the configured policy.
    pub async fn send(&self, request: &Request) -> CallResult {
        request.validate()?;
        let body = request.to_body()?;

        let policy = self.config.retry;
        let mut attempt = 1;
        loop {
            let result = self.attempt(&body).await;
            match result {
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    attempt += 1;
                    let delay = policy.backoff_for(attempt);
                    warn!(
                        endpoint = %self.endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Tenant call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// One signed POST. Signs afresh so retries carry a current timestamp
    /// and, in nonce mode, a new nonce.
    async fn attempt(&self, body: &[u8]) -> CallResult {
        let signed = self.signer.sign(body, current_timestamp());

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(HEADER_TENANT_ID, &signed.tenant_id)
            .header(HEADER_TIMESTAMP, signed.timestamp.to_string())
            .header(HEADER_SIGNATURE, &signed.signature);
        if let Some(nonce) = &signed.nonce {
            builder = builder.header(HEADER_NONCE, nonce);
        }

        let response = builder.body(body.to_vec()).send().await.map_err(map_reqwest)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(map_reqwest)?;

        let envelope = Envelope::decode(&bytes).map_err(|e| {
            CallError::transport(format!("HTTP {status} without a valid envelope: {e}"))
        })?;
        debug!(endpoint = %self.endpoint, status = status.as_u16(), ok = envelope.is_ok(), "Tenant call returned");
        envelope.into_result()
    }
}

fn map_reqwest(e: reqwest::Error) -> CallError {
    if e.is_timeout() {
        CallError::timeout(format!("tenant call timed out: {e}"))
    } else {
        CallError::transport(format!("tenant call failed: {e}"))
    }
}
