//! # Module Identity and Identifier Grammar
//!
//! Every tier routes on `(distributorCode, moduleCode)`. Identifiers that
//! arrive over a serialization boundary are checked against a strict grammar
//! before any registry is consulted:
//!
//! - dist / module: `^[a-zA-Z0-9_-]+(/[a-zA-Z0-9_-]+)?$`
//! - command: `^[a-zA-Z_][a-zA-Z0-9_]*$`

use crate::errors::CallError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound on any single identifier.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Routing key used by every tier to locate a handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleIdentity {
    /// Distributor code.
    pub dist: String,
    /// Module code within the distributor.
    pub module: String,
}

impl ModuleIdentity {
    /// Build an identity without validation. Use for trusted, in-process names.
    pub fn new(dist: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            dist: dist.into(),
            module: module.into(),
        }
    }

    /// Build an identity from untrusted input.
    pub fn parse(dist: &str, module: &str) -> Result<Self, CallError> {
        validate_segment("dist", dist)?;
        validate_segment("module", module)?;
        Ok(Self::new(dist, module))
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.dist, self.module)
    }
}

fn is_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Check a dist/module code (or tenant id) against the segment grammar.
///
/// `field` names the offending field in the error message.
pub fn validate_segment(field: &str, value: &str) -> Result<(), CallError> {
    if value.is_empty() || value.len() > MAX_IDENTIFIER_LEN {
        return Err(CallError::validation(format!(
            "invalid {field}: length must be 1..={MAX_IDENTIFIER_LEN}"
        )));
    }

    let mut parts = value.split('/');
    let valid = match (parts.next(), parts.next(), parts.next()) {
        (Some(head), None, None) => !head.is_empty() && head.chars().all(is_segment_char),
        (Some(head), Some(tail), None) => {
            !head.is_empty()
                && !tail.is_empty()
                && head.chars().all(is_segment_char)
                && tail.chars().all(is_segment_char)
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(CallError::validation(format!("invalid {field} identifier")))
    }
}

/// Check a command name against `^[a-zA-Z_][a-zA-Z0-9_]*$`.
pub fn validate_command(value: &str) -> Result<(), CallError> {
    if value.is_empty() || value.len() > MAX_IDENTIFIER_LEN {
        return Err(CallError::validation(format!(
            "invalid command: length must be 1..={MAX_IDENTIFIER_LEN}"
        )));
    }

    let mut chars = value.chars();
    let head_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let tail_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if head_ok && tail_ok {
        Ok(())
    } else {
        Err(CallError::validation("invalid command identifier"))
    }
}
