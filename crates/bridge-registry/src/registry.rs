//! # Command Registry
//!
//! A per-distributor table `(module, command) -> Command`. Built once through
//! [`CommandRegistryBuilder`], then frozen: nothing mutates a
//! [`CommandRegistry`] while it serves calls.
//!
//! ## Entry Points
//!
//! - [`CommandRegistry::execute_api`]: L1, `on_api_call` gate.
//! - [`CommandRegistry::execute_bridge`]: L2 and L4, `on_bridge_call` gate
//!   plus tier exposure. The only entry point network handlers may use.
//! - [`CommandRegistry::execute_internal`]: no gate. Requires an
//!   [`InternalAccess`] token that only `Distributor::internal` can mint.

use bridge_types::{validate_command, validate_segment, CallError, CallResult, ModuleIdentity};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::gate::GatePolicy;
use crate::module::{handler, Arity, Command, Handler, Module, Tier};

/// Proof that the caller sits on the trusted, non-network call path.
///
/// Constructible only inside this crate.
#[derive(Debug)]
pub struct InternalAccess {
    _private: (),
}

impl InternalAccess {
    pub(crate) const fn new() -> Self {
        Self { _private: () }
    }
}

struct ModuleEntry {
    identity: ModuleIdentity,
    hooks: Option<Arc<dyn Module>>,
    commands: BTreeMap<String, Command>,
}

impl ModuleEntry {
    fn hooks(&self) -> Option<&dyn Module> {
        self.hooks.as_deref()
    }
}

/// Mutable staging area for a [`CommandRegistry`].
pub struct CommandRegistryBuilder {
    dist: String,
    gates: GatePolicy,
    modules: HashMap<String, ModuleEntry>,
}

impl CommandRegistryBuilder {
    pub fn new(dist: impl Into<String>) -> Self {
        Self {
            dist: dist.into(),
            gates: GatePolicy::default(),
            modules: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_gates(mut self, gates: GatePolicy) -> Self {
        self.gates = gates;
        self
    }

    #[must_use]
    pub fn dist(&self) -> &str {
        &self.dist
    }

    /// Add a module and let it register its commands.
    pub fn module<M: Module>(&mut self, module: Arc<M>) -> Result<&mut Self, RegistryError> {
        let identity = module.identity();
        self.check_identity(&identity)?;

        match self.modules.get_mut(&identity.module) {
            Some(entry) if entry.hooks.is_some() => {
                return Err(RegistryError::DuplicateModule(identity));
            }
            Some(entry) => entry.hooks = Some(module.clone()),
            None => {
                self.modules.insert(
                    identity.module.clone(),
                    ModuleEntry {
                        identity: identity.clone(),
                        hooks: Some(module.clone()),
                        commands: BTreeMap::new(),
                    },
                );
            }
        }

        let mut registrar = Registrar {
            builder: self,
            module: identity,
        };
        module.register(&mut registrar)?;
        Ok(self)
    }

    /// Register one command for `module`.
    ///
    /// Modules registered this way (without a [`Module`] object) get no gate
    /// hooks and fall back to the policy defaults.
    pub fn register(
        &mut self,
        module: &ModuleIdentity,
        name: &str,
        tier: Tier,
        arity: Arity,
        handler: Handler,
    ) -> Result<&mut Self, RegistryError> {
        self.check_identity(module)?;
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        validate_command(name).map_err(|e| RegistryError::InvalidIdentifier(e.message))?;

        let entry = self
            .modules
            .entry(module.module.clone())
            .or_insert_with(|| ModuleEntry {
                identity: module.clone(),
                hooks: None,
                commands: BTreeMap::new(),
            });

        if entry.commands.contains_key(name) {
            return Err(RegistryError::DuplicateCommand {
                module: module.clone(),
                command: name.to_string(),
            });
        }

        entry.commands.insert(
            name.to_string(),
            Command::new(name.to_string(), module.clone(), tier, arity, handler),
        );
        Ok(self)
    }

    fn check_identity(&self, identity: &ModuleIdentity) -> Result<(), RegistryError> {
        validate_segment("dist", &identity.dist)
            .and_then(|()| validate_segment("module", &identity.module))
            .map_err(|e| RegistryError::InvalidIdentifier(e.message))?;
        if identity.dist != self.dist {
            return Err(RegistryError::ForeignModule {
                module: identity.clone(),
                dist: self.dist.clone(),
            });
        }
        Ok(())
    }

    /// Freeze the table.
    #[must_use]
    pub fn build(self) -> CommandRegistry {
        let commands = self.modules.values().map(|m| m.commands.len()).sum::<usize>();
        debug!(dist = %self.dist, modules = self.modules.len(), commands, "Command registry built");
        CommandRegistry {
            dist: self.dist,
            gates: self.gates,
            modules: self.modules,
        }
    }
}

/// Handle passed to [`Module::register`], scoped to one module.
pub struct Registrar<'a> {
    builder: &'a mut CommandRegistryBuilder,
    module: ModuleIdentity,
}

impl Registrar<'_> {
    #[must_use]
    pub fn module(&self) -> &ModuleIdentity {
        &self.module
    }

    /// Register a command on the current module.
    pub fn command<F>(
        &mut self,
        name: &str,
        tier: Tier,
        arity: Arity,
        f: F,
    ) -> Result<&mut Self, RegistryError>
    where
        F: Fn(&[Value]) -> Result<Value, bridge_types::HandlerError> + Send + Sync + 'static,
    {
        self.builder
            .register(&self.module, name, tier, arity, handler(f))?;
        Ok(self)
    }
}

/// Arguments to [`CommandRegistry::execute_bridge`].
#[derive(Debug, Clone, Copy)]
pub struct BridgeCall<'a> {
    /// Distributor the call originates from, as seen by `on_bridge_call`.
    pub source_dist: &'a str,
    pub module: &'a str,
    pub command: &'a str,
    pub args: &'a [Value],
    /// Tier the call arrived through (`Bridge` for L2, `Tenant` for L4).
    pub origin: Tier,
}

/// Frozen command table for one distributor.
pub struct CommandRegistry {
    dist: String,
    gates: GatePolicy,
    modules: HashMap<String, ModuleEntry>,
}

impl CommandRegistry {
    #[must_use]
    pub fn dist(&self) -> &str {
        &self.dist
    }

    #[must_use]
    pub fn gates(&self) -> &GatePolicy {
        &self.gates
    }

    /// Look up a command without invoking it.
    #[must_use]
    pub fn lookup(&self, module: &str, command: &str) -> Option<&Command> {
        self.modules.get(module)?.commands.get(command)
    }

    /// Gate hooks of a module, if it was registered as a [`Module`].
    #[must_use]
    pub fn hooks(&self, module: &str) -> Option<&dyn Module> {
        self.modules.get(module)?.hooks()
    }

    #[must_use]
    pub fn contains_module(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    /// Every command, ordered by module then name.
    #[must_use]
    pub fn commands(&self) -> Vec<&Command> {
        let mut modules: Vec<_> = self.modules.values().collect();
        modules.sort_by(|a, b| a.identity.cmp(&b.identity));
        modules
            .into_iter()
            .flat_map(|m| m.commands.values())
            .collect()
    }

    fn entry(&self, module: &str) -> Result<&ModuleEntry, CallError> {
        self.modules
            .get(module)
            .ok_or_else(|| CallError::not_found(format!("module '{}::{module}' not found", self.dist)))
    }

    fn command<'a>(&self, entry: &'a ModuleEntry, command: &str) -> Result<&'a Command, CallError> {
        entry.commands.get(command).ok_or_else(|| {
            CallError::not_found(format!(
                "command '{command}' not registered on {}",
                entry.identity
            ))
        })
    }

    /// L1 dispatch: `on_api_call` gate, then the handler. Every tier is
    /// reachable in-process.
    pub fn execute_api(
        &self,
        caller: &ModuleIdentity,
        module: &str,
        command: &str,
        args: &[Value],
    ) -> CallResult {
        let entry = self.entry(module)?;
        let decision = self
            .gates
            .decide_api(&entry.identity, entry.hooks(), caller, command);
        if !decision.is_allow() {
            warn!(caller = %caller, target = %entry.identity, command, "API call denied by gate");
            return Err(CallError::permission_denied(format!(
                "call to '{command}' denied by {}",
                entry.identity
            )));
        }
        self.command(entry, command)?.invoke(args)
    }

    /// Bridge dispatch for L2 and L4.
    ///
    /// Order: module lookup, `on_bridge_call` gate, command lookup, tier
    /// exposure, arity, handler.
    pub fn execute_bridge(&self, call: BridgeCall<'_>) -> CallResult {
        let entry = self.entry(call.module)?;

        let decision =
            self.gates
                .decide_bridge(&entry.identity, entry.hooks(), call.source_dist, call.command);
        if !decision.is_allow() {
            warn!(
                source_dist = call.source_dist,
                target = %entry.identity,
                command = call.command,
                "Bridge call denied by gate"
            );
            return Err(CallError::permission_denied(format!(
                "bridge call to '{}' denied by {}",
                call.command, entry.identity
            )));
        }

        let cmd = self.command(entry, call.command)?;
        if !cmd.tier.exposes(call.origin) {
            warn!(
                target = %entry.identity,
                command = call.command,
                exposed = %cmd.tier,
                origin = %call.origin,
                "Command not exposed at tier"
            );
            return Err(CallError::permission_denied(format!(
                "command not exposed at tier '{}'",
                call.origin
            )));
        }

        debug!(target = %entry.identity, command = call.command, origin = %call.origin, "Bridge dispatch");
        cmd.invoke(call.args)
    }

    /// Ungated dispatch for the trusted internal path.
    pub fn execute_internal(
        &self,
        _access: &InternalAccess,
        module: &str,
        command: &str,
        args: &[Value],
    ) -> CallResult {
        let entry = self.entry(module)?;
        self.command(entry, command)?.invoke(args)
    }
}

impl std::fmt::Debug for CommandRegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistryBuilder")
            .field("dist", &self.dist)
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("dist", &self.dist)
            .field("modules", &self.modules.len())
            .finish_non_exhaustive()
    }
}
