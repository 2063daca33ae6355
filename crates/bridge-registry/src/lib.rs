//! # Bridge Registry
//!
//! Command tables, permission gates and the L1 emitter for one or more
//! distributors.
//!
//! ```text
//! Emitter::invoke ──────► CommandRegistry::execute_api ──► on_api_call ──┐
//! L2/L4 handlers ───────► CommandRegistry::execute_bridge ► on_bridge_call ┤
//! Distributor::internal ► CommandRegistry::execute_internal ──────────────┤
//!                                                                        ▼
//!                                                           Command::invoke
//! ```
//!
//! Registries are explicit values owned by a [`Distributor`]; there is no
//! process-wide table, so isolated registries coexist within one process.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod distributor;
pub mod emitter;
pub mod error;
pub mod gate;
pub mod module;
pub mod registry;

pub use distributor::{
    Distributor, DistributorDirectory, ExecutionMode, InternalCaller, StaticDirectory,
};
pub use emitter::Emitter;
pub use error::RegistryError;
pub use gate::{Decision, GateDefaults, GateOverrides, GatePolicy};
pub use module::{handler, Arity, Command, Handler, Module, Tier};
pub use registry::{BridgeCall, CommandRegistry, CommandRegistryBuilder, InternalAccess, Registrar};
