//! Registry construction errors.

use bridge_types::ModuleIdentity;
use thiserror::Error;

/// Errors raised while building a command registry.
///
/// These surface at module initialisation, never during request servicing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("command '{command}' already registered for {module}")]
    DuplicateCommand {
        module: ModuleIdentity,
        command: String,
    },

    #[error("module {0} registered twice")]
    DuplicateModule(ModuleIdentity),

    #[error("command name must not be empty")]
    EmptyName,

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("module {module} does not belong to distributor '{dist}'")]
    ForeignModule { module: ModuleIdentity, dist: String },
}
