//! # Permission Gates
//!
//! Each tier consults one boolean hook immediately before dispatch:
//!
//! | Hook             | Tier | Consulted by                 |
//! |------------------|------|------------------------------|
//! | `on_api_call`    | L1   | `Emitter::invoke`            |
//! | `on_bridge_call` | L2+  | `CommandRegistry::execute_bridge` |
//! | `on_tenant_call` | L4   | the HTTP bridge handler      |
//!
//! A module that does not override a hook falls back to the policy default
//! for that tier, which in turn may be overridden per module code. Out of the
//! box every default is `allow`; [`GatePolicy::log_summary`] prints the
//! effective posture at startup so it is never implicit.

use bridge_types::ModuleIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::module::Module;

/// A gate outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    #[default]
    Allow,
    Deny,
}

impl Decision {
    #[must_use]
    pub const fn is_allow(self) -> bool {
        matches!(self, Self::Allow)
    }

    #[must_use]
    pub const fn from_bool(allow: bool) -> Self {
        if allow {
            Self::Allow
        } else {
            Self::Deny
        }
    }
}

/// Default decision for each hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateDefaults {
    pub api: Decision,
    pub bridge: Decision,
    pub tenant: Decision,
}

/// Per-module replacements for individual defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateOverrides {
    pub api: Option<Decision>,
    pub bridge: Option<Decision>,
    pub tenant: Option<Decision>,
}

/// Auditable gate configuration for one distributor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
    pub defaults: GateDefaults,
    /// Keyed by module code.
    pub modules: BTreeMap<String, GateOverrides>,
}

impl GatePolicy {
    /// Every default set to `deny`.
    #[must_use]
    pub fn deny_all() -> Self {
        Self {
            defaults: GateDefaults {
                api: Decision::Deny,
                bridge: Decision::Deny,
                tenant: Decision::Deny,
            },
            modules: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>, overrides: GateOverrides) -> Self {
        self.modules.insert(module.into(), overrides);
        self
    }

    fn overrides(&self, module: &ModuleIdentity) -> GateOverrides {
        self.modules.get(&module.module).copied().unwrap_or_default()
    }

    /// Effective L1 default for `module`.
    #[must_use]
    pub fn api_default(&self, module: &ModuleIdentity) -> Decision {
        self.overrides(module).api.unwrap_or(self.defaults.api)
    }

    /// Effective bridge default for `module`.
    #[must_use]
    pub fn bridge_default(&self, module: &ModuleIdentity) -> Decision {
        self.overrides(module).bridge.unwrap_or(self.defaults.bridge)
    }

    /// Effective tenant default for `module`.
    #[must_use]
    pub fn tenant_default(&self, module: &ModuleIdentity) -> Decision {
        self.overrides(module).tenant.unwrap_or(self.defaults.tenant)
    }

    /// Resolve `on_api_call` for `target`, or its default.
    pub fn decide_api(
        &self,
        target: &ModuleIdentity,
        hooks: Option<&dyn Module>,
        caller: &ModuleIdentity,
        command: &str,
    ) -> Decision {
        hooks
            .and_then(|m| m.on_api_call(caller, command))
            .map_or_else(|| self.api_default(target), Decision::from_bool)
    }

    /// Resolve `on_bridge_call` for `target`, or its default.
    pub fn decide_bridge(
        &self,
        target: &ModuleIdentity,
        hooks: Option<&dyn Module>,
        source_dist: &str,
        command: &str,
    ) -> Decision {
        hooks
            .and_then(|m| m.on_bridge_call(source_dist, command))
            .map_or_else(|| self.bridge_default(target), Decision::from_bool)
    }

    /// Resolve `on_tenant_call` for `target`, or its default.
    pub fn decide_tenant(
        &self,
        target: &ModuleIdentity,
        hooks: Option<&dyn Module>,
        tenant_id: &str,
        command: &str,
    ) -> Decision {
        hooks
            .and_then(|m| m.on_tenant_call(tenant_id, &target.dist, command))
            .map_or_else(|| self.tenant_default(target), Decision::from_bool)
    }

    /// Log the effective gate posture for a distributor.
    pub fn log_summary(&self, dist: &str) {
        info!(
            dist,
            api = ?self.defaults.api,
            bridge = ?self.defaults.bridge,
            tenant = ?self.defaults.tenant,
            overrides = self.modules.len(),
            "Gate defaults"
        );
        for (module, o) in &self.modules {
            info!(dist, module = %module, api = ?o.api, bridge = ?o.bridge, tenant = ?o.tenant, "Gate override");
        }
        if self.defaults == GateDefaults::default() {
            warn!(dist, "All gate defaults are allow; modules without hooks are open at every tier");
        }
    }
}
