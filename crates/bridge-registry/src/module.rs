//! # Modules and Commands
//!
//! A module contributes named commands to its distributor's registry and may
//! override the three permission hooks. Hooks return `None` when the module
//! has no opinion, in which case the configured [`GatePolicy`] default
//! applies.
//!
//! [`GatePolicy`]: crate::gate::GatePolicy

use bridge_types::{CallError, CallResult, HandlerError, ModuleIdentity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

use crate::error::RegistryError;
use crate::registry::Registrar;

/// The widest tier a command is reachable from.
///
/// Ordered `Internal < Bridge < Tenant`: a `Tenant` command is reachable from
/// every tier, an `Internal` one only in-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Internal,
    Bridge,
    Tenant,
}

impl Tier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Bridge => "bridge",
            Self::Tenant => "tenant",
        }
    }

    /// Whether a command exposed at `self` may be called from `origin`.
    #[must_use]
    pub fn exposes(self, origin: Tier) -> bool {
        origin <= self
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Positional argument count a command accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Arity {
    Exact(usize),
    #[default]
    Any,
}

impl Arity {
    pub fn check(self, command: &str, given: usize) -> Result<(), CallError> {
        match self {
            Self::Exact(n) if n != given => Err(CallError::validation(format!(
                "command '{command}' expects {n} argument(s), got {given}"
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(n) => write!(f, "{n}"),
            Self::Any => f.write_str("*"),
        }
    }
}

/// A command body. Receives positional args, returns a JSON value.
pub type Handler = Arc<dyn Fn(&[Value]) -> Result<Value, HandlerError> + Send + Sync>;

/// Box a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&[Value]) -> Result<Value, HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A registered command.
#[derive(Clone)]
pub struct Command {
    pub name: String,
    pub module: ModuleIdentity,
    pub tier: Tier,
    pub arity: Arity,
    handler: Handler,
}

impl Command {
    pub(crate) fn new(
        name: String,
        module: ModuleIdentity,
        tier: Tier,
        arity: Arity,
        handler: Handler,
    ) -> Self {
        Self {
            name,
            module,
            tier,
            arity,
            handler,
        }
    }

    /// Run the handler. Handler errors and panics come back as
    /// `HandlerError`; nothing escapes this frame.
    pub fn invoke(&self, args: &[Value]) -> CallResult {
        self.arity.check(&self.name, args.len())?;

        match catch_unwind(AssertUnwindSafe(|| (self.handler)(args))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(HandlerError(message))) => {
                error!(
                    module = %self.module,
                    command = %self.name,
                    error = %message,
                    "Command handler failed"
                );
                Err(CallError::handler(message))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    module = %self.module,
                    command = %self.name,
                    panic = %message,
                    "Command handler panicked"
                );
                Err(CallError::handler(format!("handler panicked: {message}")))
            }
        }
    }

    /// Descriptor used by introspection commands.
    #[must_use]
    pub fn describe(&self) -> Value {
        serde_json::json!({
            "module": self.module.module,
            "command": self.name,
            "tier": self.tier.as_str(),
            "arity": self.arity.to_string(),
        })
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("module", &self.module)
            .field("tier", &self.tier)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A unit of code that exposes commands and guards them with gate hooks.
///
/// All three hooks default to `None` ("no override"). They must be pure:
/// no side effects beyond observation, no partial grants.
pub trait Module: Send + Sync + 'static {
    /// Routing key of this module.
    fn identity(&self) -> ModuleIdentity;

    /// Contribute commands. Called once per registry build.
    fn register(self: Arc<Self>, registrar: &mut Registrar<'_>) -> Result<(), RegistryError>;

    /// L1 gate: an in-process `caller` wants `command`.
    fn on_api_call(&self, _caller: &ModuleIdentity, _command: &str) -> Option<bool> {
        None
    }

    /// Bridge gate, applied by `execute_bridge` for L2 and L4 calls.
    fn on_bridge_call(&self, _source_dist: &str, _command: &str) -> Option<bool> {
        None
    }

    /// Outer L4 gate, applied after authentication and before `execute_bridge`.
    fn on_tenant_call(&self, _tenant_id: &str, _dist: &str, _command: &str) -> Option<bool> {
        None
    }
}
