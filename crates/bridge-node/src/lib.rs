//! # Bridge Node
//!
//! Hosts one distributor and exposes it through the bridge tiers.
//!
//! ```text
//!                       ┌──────────────────────────────┐
//!  L4  POST /_bridge ──→│ BridgeService → BridgeHandler│──┐
//!                       └──────────────────────────────┘  │
//!  L2  stdin ─────────→ serve_stdio ──────────────────────┼──→ Distributor
//!                                                          │     (registry)
//!  CLI exec ──────────→ Distributor::internal() ───────────┘
//! ```
//!
//! Embedders add their own modules with [`Node::with_modules`]; the `core`
//! module is always present.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod core_module;
pub mod node;

pub use config::{ConfigError, NodeConfig, NodeSection, SecurityConfig, TenantSecretConfig};
pub use core_module::{CoreModule, CORE_MODULE};
pub use node::{Installer, Node, NodeError};
