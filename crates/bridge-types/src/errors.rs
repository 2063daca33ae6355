//! # Error Types
//!
//! The error taxonomy surfaced to every caller, independent of tier.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure categories a caller can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed request, identifier, argument list or arity.
    ValidationError,
    /// Missing/expired/forged authentication material.
    AuthError,
    /// A permission gate said no.
    PermissionError,
    /// No such distributor, module or command.
    NotFoundError,
    /// The command handler failed or panicked.
    HandlerError,
    /// Spawn failure, bad exit status, unreachable host, malformed reply.
    TransportError,
    /// The caller-local deadline elapsed.
    TimeoutError,
}

impl ErrorKind {
    /// Numeric code carried in `{ok:false}` envelopes.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::ValidationError => 400,
            Self::AuthError => 401,
            Self::PermissionError => 403,
            Self::NotFoundError => 404,
            Self::HandlerError => 500,
            Self::TransportError => 502,
            Self::TimeoutError => 504,
        }
    }

    /// Inverse of [`ErrorKind::code`].
    ///
    /// Codes outside the table fall back to `HandlerError` for the 5xx range
    /// and `ValidationError` for everything else.
    #[must_use]
    pub const fn from_code(code: u16) -> Self {
        match code {
            400 => Self::ValidationError,
            401 => Self::AuthError,
            403 => Self::PermissionError,
            404 => Self::NotFoundError,
            500 => Self::HandlerError,
            502 => Self::TransportError,
            504 => Self::TimeoutError,
            c if c >= 500 => Self::HandlerError,
            _ => Self::ValidationError,
        }
    }

    /// Stable lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "validation",
            Self::AuthError => "auth",
            Self::PermissionError => "permission",
            Self::NotFoundError => "not_found",
            Self::HandlerError => "handler",
            Self::TransportError => "transport",
            Self::TimeoutError => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The one typed error every caller-side failure surfaces as.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} ({}): {message}", .kind.code())]
pub struct CallError {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Human-readable detail. Never branch on this.
    pub message: String,
}

impl CallError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthError, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFoundError, message)
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HandlerError, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransportError, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TimeoutError, message)
    }

    /// Numeric code of the kind.
    #[must_use]
    pub fn code(&self) -> u16 {
        self.kind.code()
    }

    /// Whether a bounded retry policy may try this call again.
    ///
    /// Only failures that happened before the callee could have run the
    /// handler to completion are eligible.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::TransportError | ErrorKind::TimeoutError
        )
    }
}

/// Result of any dispatch at any tier.
pub type CallResult = Result<serde_json::Value, CallError>;

/// Error returned by a command handler.
///
/// Converted into a `HandlerError` envelope at the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self(format!("serialization failed: {e}"))
    }
}

/// Envelope shape violations found while decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// Input was not JSON.
    #[error("malformed JSON: {0}")]
    Malformed(String),

    /// Top level was not an object.
    #[error("envelope must be a JSON object")]
    NotAnObject,

    /// `ok` missing or not a boolean.
    #[error("envelope field 'ok' must be a boolean")]
    MissingOk,

    /// A field required by the chosen shape is absent or mistyped.
    #[error("envelope missing field '{0}'")]
    MissingField(&'static str),

    /// A field that must be absent for the chosen shape is present.
    #[error("envelope has unexpected field '{0}'")]
    UnexpectedField(String),
}
