//! # Bridge Types Crate
//!
//! Contracts shared by every tier of the command bridge.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: the wire `Request` and the universal
//!   `Envelope` are defined here and nowhere else.
//! - **Kinds, not strings**: every failure carries an [`ErrorKind`] with a
//!   stable numeric code; callers branch on the kind.
//! - **Fail closed**: identifier grammar and the HMAC timestamp window are
//!   checked before anything touches a registry.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod envelope;
pub mod errors;
pub mod identity;
pub mod security;

pub use envelope::{validate_args, Envelope, Request, MAX_ARGS_DEPTH};
pub use errors::*;
pub use identity::{validate_command, validate_segment, ModuleIdentity};
pub use security::*;
