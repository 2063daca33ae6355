//! Built-in `core` module: liveness and introspection for remote callers.

use bridge_registry::{Arity, CommandRegistry, Module, Registrar, RegistryError, Tier};
use bridge_types::ModuleIdentity;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;

/// Module code of the built-in module.
pub const CORE_MODULE: &str = "core";

/// `ping`, `echo` and `describe`, all exposed at tenant tier.
pub struct CoreModule {
    identity: ModuleIdentity,
    catalog: RwLock<Vec<Value>>,
}

impl CoreModule {
    pub fn new(dist: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            identity: ModuleIdentity::new(dist, CORE_MODULE),
            catalog: RwLock::new(Vec::new()),
        })
    }

    /// Refresh what `describe` reports. Call after every registry build.
    ///
    /// Internal-tier commands are left out: nothing outside the process can
    /// reach them.
    pub fn publish(&self, registry: &CommandRegistry) {
        let catalog = registry
            .commands()
            .into_iter()
            .filter(|c| c.tier != Tier::Internal)
            .map(|c| c.describe())
            .collect();
        *self.catalog.write() = catalog;
    }

    fn describe(&self) -> Value {
        Value::Array(self.catalog.read().clone())
    }
}

impl Module for CoreModule {
    fn identity(&self) -> ModuleIdentity {
        self.identity.clone()
    }

    fn register(self: Arc<Self>, registrar: &mut Registrar<'_>) -> Result<(), RegistryError> {
        registrar
            .command("ping", Tier::Tenant, Arity::Exact(0), |_| {
                Ok(Value::String("pong".into()))
            })?
            .command("echo", Tier::Tenant, Arity::Any, |args| {
                Ok(Value::Array(args.to_vec()))
            })?;

        let me = Arc::clone(&self);
        registrar.command("describe", Tier::Tenant, Arity::Exact(0), move |_| {
            Ok(me.describe())
        })?;
        Ok(())
    }
}
