//! # Bridge Transport
//!
//! Carriers for calls that leave the process.
//!
//! | Tier | Caller                | Callee                  | Auth          |
//! |------|-----------------------|-------------------------|---------------|
//! | L2   | [`StdioBridgeClient`] | [`serve_stdio`]         | spawn right   |
//! | L4   | [`TenantEmitter`]     | [`BridgeHandler`] via [`BridgeService`] | HMAC-SHA256 |
//!
//! Both tiers speak the same wire contract: a JSON `Request` in, exactly one
//! JSON `Envelope` out.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod handler;
pub mod metrics;
pub mod service;
pub mod stdio;
pub mod tenant;

pub use config::{
    ClientConfig, RetryPolicy, ServerConfig, StdioConfig, TransportConfigError,
    DEFAULT_MAX_BODY_BYTES,
};
pub use handler::{BridgeHandler, TENANT_SOURCE_PREFIX};
pub use metrics::BridgeMetrics;
pub use service::{BridgeService, BRIDGE_PATH, HEALTH_PATH, METRICS_PATH};
pub use stdio::{handle_stdio_request, serve_stdio, StdioBridgeClient, SOURCE_DIST_ENV};
pub use tenant::TenantEmitter;
