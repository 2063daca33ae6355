//! # Wire Request and Response Envelope
//!
//! The request body carried by L2 (stdin) and L4 (HTTP POST):
//!
//! ```text
//! {"dist": string, "module": string, "command": string, "args": [ ... ]}
//! ```
//!
//! The universal response:
//!
//! ```text
//! {"ok": true,  "data": <any>}
//! {"ok": false, "error": string, "code": int}
//! ```
//!
//! Exactly one of the two response shapes is valid. `data` is present iff
//! `ok` is true; a decoder that sees anything else rejects the envelope.

use crate::errors::{CallError, CallResult, EnvelopeError, ErrorKind};
use crate::identity::{validate_command, validate_segment, ModuleIdentity};
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum array nesting accepted inside `args`.
pub const MAX_ARGS_DEPTH: usize = 32;

// =============================================================================
// REQUEST
// =============================================================================

/// Wire payload for L2 and L4 calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    /// Target distributor code.
    pub dist: String,
    /// Target module code.
    pub module: String,
    /// Command name.
    pub command: String,
    /// Positional arguments (JSON scalars and arrays only).
    pub args: Vec<Value>,
}

impl Request {
    pub fn new(
        dist: impl Into<String>,
        module: impl Into<String>,
        command: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            dist: dist.into(),
            module: module.into(),
            command: command.into(),
            args,
        }
    }

    /// Decode a request body.
    ///
    /// Only checks shape: a JSON object with string `dist`, `module`,
    /// `command` and an array `args`. Call [`Request::validate`] afterwards.
    pub fn parse(body: &[u8]) -> Result<Self, CallError> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| CallError::validation(format!("request is not valid JSON: {e}")))?;

        if !value.is_object() {
            return Err(CallError::validation("request must be a JSON object"));
        }

        serde_json::from_value(value)
            .map_err(|e| CallError::validation(format!("malformed request: {e}")))
    }

    /// Check identifiers against the grammar, then the argument list.
    pub fn validate(&self) -> Result<(), CallError> {
        validate_segment("dist", &self.dist)?;
        validate_segment("module", &self.module)?;
        validate_command(&self.command)?;
        validate_args(&self.args)
    }

    /// The routing key this request targets.
    #[must_use]
    pub fn target(&self) -> ModuleIdentity {
        ModuleIdentity::new(self.dist.clone(), self.module.clone())
    }

    /// Canonical body bytes (what L4 signs and L2 writes to stdin).
    pub fn to_body(&self) -> Result<Vec<u8>, CallError> {
        serde_json::to_vec(self)
            .map_err(|e| CallError::validation(format!("request serialization failed: {e}")))
    }
}

/// Reject anything that is not a JSON scalar or array, recursively.
pub fn validate_args(args: &[Value]) -> Result<(), CallError> {
    fn check(value: &Value, depth: usize) -> Result<(), CallError> {
        match value {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(()),
            Value::Array(items) => {
                if depth > MAX_ARGS_DEPTH {
                    return Err(CallError::validation(format!(
                        "args nested deeper than {MAX_ARGS_DEPTH}"
                    )));
                }
                items.iter().try_for_each(|v| check(v, depth + 1))
            }
            Value::Object(_) => Err(CallError::validation(
                "args may contain only strings, numbers, booleans, null and arrays",
            )),
        }
    }

    args.iter().try_for_each(|v| check(v, 1))
}

// =============================================================================
// ENVELOPE
// =============================================================================

/// The universal response wrapper used at every tier above L1.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// `{ok: true, data}`
    Success(Value),
    /// `{ok: false, error, code}`
    Failure {
        /// Human-readable message.
        error: String,
        /// Numeric error kind.
        code: u16,
    },
}

impl Envelope {
    pub fn success(data: Value) -> Self {
        Self::Success(data)
    }

    pub fn failure(error: impl Into<String>, code: u16) -> Self {
        Self::Failure {
            error: error.into(),
            code,
        }
    }

    /// Wrap a dispatch outcome.
    pub fn from_result(result: CallResult) -> Self {
        match result {
            Ok(data) => Self::Success(data),
            Err(err) => Self::from_error(&err),
        }
    }

    pub fn from_error(err: &CallError) -> Self {
        Self::Failure {
            error: err.message.clone(),
            code: err.code(),
        }
    }

    /// Caller-side unwrap: `{ok:false}` becomes one typed [`CallError`].
    pub fn into_result(self) -> CallResult {
        match self {
            Self::Success(data) => Ok(data),
            Self::Failure { error, code } => Err(CallError::new(ErrorKind::from_code(code), error)),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Failure code, if this is a failure.
    #[must_use]
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Success(_) => None,
            Self::Failure { code, .. } => Some(*code),
        }
    }

    /// Serialize as a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        match self {
            Self::Success(data) => {
                map.insert("ok".into(), Value::Bool(true));
                map.insert("data".into(), data.clone());
            }
            Self::Failure { error, code } => {
                map.insert("ok".into(), Value::Bool(false));
                map.insert("error".into(), Value::String(error.clone()));
                map.insert("code".into(), Value::from(*code));
            }
        }
        Value::Object(map)
    }

    /// Serialize to a single JSON line.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        // Field order `ok` first comes from the Serialize impl, not from Map.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Decode raw bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Decode a JSON value, enforcing exactly one valid shape.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let Value::Object(mut map) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        let ok = map
            .remove("ok")
            .and_then(|v| v.as_bool())
            .ok_or(EnvelopeError::MissingOk)?;

        if ok {
            let data = map.remove("data").ok_or(EnvelopeError::MissingField("data"))?;
            if let Some(extra) = map.keys().next() {
                return Err(EnvelopeError::UnexpectedField(extra.clone()));
            }
            return Ok(Self::Success(data));
        }

        let error = match map.remove("error") {
            Some(Value::String(s)) => s,
            _ => return Err(EnvelopeError::MissingField("error")),
        };
        let code = map
            .remove("code")
            .and_then(|v| v.as_u64())
            .and_then(|c| u16::try_from(c).ok())
            .ok_or(EnvelopeError::MissingField("code"))?;
        if let Some(extra) = map.keys().next() {
            return Err(EnvelopeError::UnexpectedField(extra.clone()));
        }

        Ok(Self::Failure { error, code })
    }
}

impl From<CallResult> for Envelope {
    fn from(result: CallResult) -> Self {
        Self::from_result(result)
    }
}

impl Serialize for Envelope {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Success(data) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("ok", &true)?;
                map.serialize_entry("data", data)?;
                map.end()
            }
            Self::Failure { error, code } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("ok", &false)?;
                map.serialize_entry("error", error)?;
                map.serialize_entry("code", code)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(de::Error::custom)
    }
}
