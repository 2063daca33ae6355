//! # Distributor
//!
//! The execution context that owns a command registry. Callers take an
//! `Arc` snapshot of the registry per call and release the lock before
//! dispatching, so a reentrant call graph never waits on itself and a
//! rebuild never lands mid-dispatch.

use bridge_types::{CallResult, ModuleIdentity};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::emitter::Emitter;
use crate::error::RegistryError;
use crate::registry::{BridgeCall, CommandRegistry, CommandRegistryBuilder, InternalAccess};

/// Where the process was started from.
///
/// Only `Cli` processes may use the ungated internal path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Cli,
    #[default]
    Network,
}

/// Owner of one registry.
pub struct Distributor {
    code: String,
    mode: ExecutionMode,
    registry: RwLock<Arc<CommandRegistry>>,
}

impl Distributor {
    pub fn new(registry: CommandRegistry, mode: ExecutionMode) -> Self {
        Self {
            code: registry.dist().to_string(),
            mode,
            registry: RwLock::new(Arc::new(registry)),
        }
    }

    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Current registry. Held by the caller for the duration of one call.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CommandRegistry> {
        self.registry.read().clone()
    }

    /// Swap in a freshly built registry.
    ///
    /// Calls already running keep the snapshot they started with.
    pub fn rebuild(&self, builder: CommandRegistryBuilder) -> Result<(), RegistryError> {
        if builder.dist() != self.code {
            return Err(RegistryError::InvalidIdentifier(format!(
                "rebuild for '{}' offered to distributor '{}'",
                builder.dist(),
                self.code
            )));
        }
        let next = Arc::new(builder.build());
        *self.registry.write() = next;
        info!(dist = %self.code, "Command registry rebuilt");
        Ok(())
    }

    /// Bridge dispatch against the current snapshot.
    pub fn execute_bridge(&self, call: BridgeCall<'_>) -> CallResult {
        self.snapshot().execute_bridge(call)
    }

    /// L1 emitter from `caller` to one of this distributor's modules.
    #[must_use]
    pub fn emitter(self: &Arc<Self>, caller: ModuleIdentity, target_module: &str) -> Emitter {
        Emitter::new(
            caller,
            ModuleIdentity::new(self.code.clone(), target_module),
            Arc::clone(self),
        )
    }

    /// The trusted internal path. `None` unless the process runs in
    /// [`ExecutionMode::Cli`].
    #[must_use]
    pub fn internal(&self) -> Option<InternalCaller<'_>> {
        match self.mode {
            ExecutionMode::Cli => Some(InternalCaller { distributor: self }),
            ExecutionMode::Network => None,
        }
    }
}

impl std::fmt::Debug for Distributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Distributor")
            .field("code", &self.code)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Ungated caller; only obtainable from a CLI-mode distributor.
#[derive(Debug)]
pub struct InternalCaller<'a> {
    distributor: &'a Distributor,
}

impl InternalCaller<'_> {
    pub fn execute(&self, module: &str, command: &str, args: &[Value]) -> CallResult {
        self.distributor
            .snapshot()
            .execute_internal(&InternalAccess::new(), module, command, args)
    }
}

/// Resolves a distributor code to its execution context.
pub trait DistributorDirectory: Send + Sync {
    fn resolve(&self, dist: &str) -> Option<Arc<Distributor>>;
}

/// Fixed directory assembled at startup.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    distributors: HashMap<String, Arc<Distributor>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, distributor: Arc<Distributor>) -> Self {
        self.insert(distributor);
        self
    }

    pub fn insert(&mut self, distributor: Arc<Distributor>) {
        self.distributors
            .insert(distributor.code().to_string(), distributor);
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.distributors.keys().map(String::as_str)
    }
}

impl DistributorDirectory for StaticDirectory {
    fn resolve(&self, dist: &str) -> Option<Arc<Distributor>> {
        self.distributors.get(dist).cloned()
    }
}
