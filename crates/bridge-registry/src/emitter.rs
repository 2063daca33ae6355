//! In-process (L1) call forwarding.

use bridge_types::{CallResult, ModuleIdentity};
use serde_json::Value;
use std::sync::Arc;

use crate::distributor::Distributor;

/// A call proxy bound to `(caller, target)`.
///
/// `invoke` runs the target's `on_api_call` gate and then the handler on the
/// caller's own stack. Arguments are borrowed and the return value is passed
/// through untouched.
#[derive(Debug, Clone)]
pub struct Emitter {
    caller: ModuleIdentity,
    target: ModuleIdentity,
    distributor: Arc<Distributor>,
}

impl Emitter {
    pub fn new(caller: ModuleIdentity, target: ModuleIdentity, distributor: Arc<Distributor>) -> Self {
        Self {
            caller,
            target,
            distributor,
        }
    }

    #[must_use]
    pub fn caller(&self) -> &ModuleIdentity {
        &self.caller
    }

    #[must_use]
    pub fn target(&self) -> &ModuleIdentity {
        &self.target
    }

    /// Call `command` on the target module.
    pub fn invoke(&self, command: &str, args: &[Value]) -> CallResult {
        // Snapshot first: the registry lock is released before the handler
        // runs, so the handler may itself invoke emitters.
        let registry = self.distributor.snapshot();
        registry.execute_api(&self.caller, &self.target.module, command, args)
    }
}
