//! # Bridge Node
//!
//! Wires one distributor to its entry points.
//!
//! ## Startup Sequence
//!
//! 1. Load and validate [`NodeConfig`]
//! 2. Build the command registry (`core` plus embedder modules)
//! 3. Log the gate posture
//! 4. Serve: L4 listener, one L2 call, or one internal CLI call

use bridge_registry::{
    CommandRegistryBuilder, Distributor, ExecutionMode, RegistryError, StaticDirectory,
};
use bridge_transport::{serve_stdio, BridgeHandler, BridgeMetrics, BridgeService};
use bridge_types::{CallResult, Envelope};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{info, warn};

use crate::config::{ConfigError, NodeConfig};
use crate::core_module::CoreModule;

/// Node startup and serving errors.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Mode(String),
}

/// Extra registrations applied after the built-in module.
pub type Installer = dyn Fn(&mut CommandRegistryBuilder) -> Result<(), RegistryError> + Send + Sync;

/// One hosted distributor plus its configuration.
pub struct Node {
    config: NodeConfig,
    distributor: Arc<Distributor>,
    core: Arc<CoreModule>,
    installer: Option<Arc<Installer>>,
}

impl Node {
    /// Node with only the built-in `core` module.
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        Self::build(config, None)
    }

    /// Node whose registry also gets whatever `install` registers.
    pub fn with_modules<F>(config: NodeConfig, install: F) -> Result<Self, NodeError>
    where
        F: Fn(&mut CommandRegistryBuilder) -> Result<(), RegistryError> + Send + Sync + 'static,
    {
        let installer: Arc<Installer> = Arc::new(install);
        Self::build(config, Some(installer))
    }

    fn build(config: NodeConfig, installer: Option<Arc<Installer>>) -> Result<Self, NodeError> {
        config.validate()?;
        let core = CoreModule::new(config.node.dist.clone());
        let builder = registry_builder(&config, &core, installer.as_deref())?;
        let registry = builder.build();
        core.publish(&registry);

        let distributor = Arc::new(Distributor::new(registry, config.node.mode));
        info!(
            dist = %distributor.code(),
            mode = ?distributor.mode(),
            commands = distributor.snapshot().commands().len(),
            "Distributor ready"
        );

        Ok(Self {
            config,
            distributor,
            core,
            installer,
        })
    }

    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    #[must_use]
    pub fn distributor(&self) -> &Arc<Distributor> {
        &self.distributor
    }

    /// Re-run every registration and swap the new table in. In-flight calls
    /// finish on the table they started with.
    pub fn reload(&self) -> Result<(), NodeError> {
        let builder = registry_builder(&self.config, &self.core, self.installer.as_deref())?;
        self.distributor.rebuild(builder)?;
        self.core.publish(&self.distributor.snapshot());
        info!(dist = %self.distributor.code(), "Registry reloaded");
        Ok(())
    }

    fn directory(&self) -> StaticDirectory {
        StaticDirectory::new().with(Arc::clone(&self.distributor))
    }

    /// The L4 request handler for this node.
    pub fn bridge_handler(&self) -> Result<BridgeHandler, NodeError> {
        let authenticator = self.config.authenticator()?;
        if self.config.security.tenants.is_empty() {
            warn!("No tenants configured: every signed request will be rejected");
        }
        Ok(BridgeHandler::new(
            Arc::new(self.directory()),
            Arc::new(authenticator),
            Arc::new(BridgeMetrics::new()),
        ))
    }

    /// Run the L4 endpoint until `shutdown` resolves.
    pub async fn serve<S>(&self, shutdown: S) -> Result<(), NodeError>
    where
        S: Future<Output = ()>,
    {
        if self.distributor.mode() == ExecutionMode::Cli {
            return Err(NodeError::Mode(
                "refusing to open a network listener in cli mode".into(),
            ));
        }
        self.config.gates.log_summary(self.distributor.code());

        let handler = Arc::new(self.bridge_handler()?);
        let mut service = BridgeService::new(self.config.server.clone(), handler);
        let listener = service.bind().await?;
        let task = service.spawn(listener);

        shutdown.await;
        info!("Shutdown requested");
        service.shutdown();

        match task.await {
            Ok(result) => Ok(result?),
            Err(e) => Err(NodeError::Io(std::io::Error::other(e))),
        }
    }

    /// Serve one L2 call from `input` to `output`.
    pub async fn serve_stdio<R, W>(
        &self,
        source_dist: Option<&str>,
        input: R,
        output: W,
    ) -> Result<Envelope, NodeError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let directory = self.directory();
        let envelope = serve_stdio(
            &directory,
            source_dist,
            self.config.server.max_body_bytes,
            input,
            output,
        )
        .await?;
        Ok(envelope)
    }

    /// The trusted internal path. Only a CLI-mode node has one.
    pub fn exec(&self, module: &str, command: &str, args: &[Value]) -> Result<CallResult, NodeError> {
        let caller = self.distributor.internal().ok_or_else(|| {
            NodeError::Mode("internal calls need node.mode = \"cli\"".into())
        })?;
        info!(module, command, "Internal call");
        Ok(caller.execute(module, command, args))
    }
}

fn registry_builder(
    config: &NodeConfig,
    core: &Arc<CoreModule>,
    installer: Option<&Installer>,
) -> Result<CommandRegistryBuilder, RegistryError> {
    let mut builder =
        CommandRegistryBuilder::new(config.node.dist.clone()).with_gates(config.gates.clone());
    builder.module(Arc::clone(core))?;
    if let Some(install) = installer {
        install(&mut builder)?;
    }
    Ok(builder)
}
