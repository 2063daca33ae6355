//! Shared fixtures: a spy module, distributors, secrets and a live L4 endpoint.

use bridge_registry::{
    Arity, CommandRegistryBuilder, Distributor, DistributorDirectory, ExecutionMode, GatePolicy,
    Module, Registrar, RegistryError, StaticDirectory, Tier,
};
use bridge_transport::{BridgeHandler, BridgeMetrics, BridgeService, ServerConfig, BRIDGE_PATH};
use bridge_types::{
    Authenticator, HandlerError, ModuleIdentity, ReplayMode, Secret, Signer, StaticSecretStore,
    TenantSecrets, HEADER_NONCE, HEADER_SIGNATURE, HEADER_TENANT_ID, HEADER_TIMESTAMP,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const DIST: &str = "d";
pub const MODULE: &str = "m";
pub const TENANT: &str = "t1";
pub const WINDOW_SECS: u64 = 60;

/// 32-byte secret filled with `byte`.
pub fn secret(byte: u8) -> Secret {
    Secret::new(vec![byte; 32]).expect("32 bytes is long enough")
}

/// The tenant's shared key in every fixture.
pub const GOOD_KEY: u8 = 0x42;

/// Counts every gate consultation and handler run.
#[derive(Default)]
pub struct Spy {
    pub api_calls: AtomicUsize,
    pub bridge_calls: AtomicUsize,
    pub tenant_calls: AtomicUsize,
    pub handler_runs: AtomicUsize,
}

impl Spy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gate_calls(&self) -> usize {
        self.api_calls.load(Ordering::SeqCst)
            + self.bridge_calls.load(Ordering::SeqCst)
            + self.tenant_calls.load(Ordering::SeqCst)
    }

    pub fn handler_runs(&self) -> usize {
        self.handler_runs.load(Ordering::SeqCst)
    }
}

impl Module for Spy {
    fn identity(&self) -> ModuleIdentity {
        ModuleIdentity::new(DIST, MODULE)
    }

    fn register(self: Arc<Self>, r: &mut Registrar<'_>) -> Result<(), RegistryError> {
        let me = Arc::clone(&self);
        r.command("ping", Tier::Tenant, Arity::Exact(0), move |_| {
            me.handler_runs.fetch_add(1, Ordering::SeqCst);
            Ok(json!("pong"))
        })?;

        let me = Arc::clone(&self);
        r.command("add", Tier::Tenant, Arity::Exact(2), move |args| {
            me.handler_runs.fetch_add(1, Ordering::SeqCst);
            let a = args[0].as_f64().ok_or_else(|| HandlerError::new("a is not a number"))?;
            let b = args[1].as_f64().ok_or_else(|| HandlerError::new("b is not a number"))?;
            Ok(json!(a + b))
        })?;

        let me = Arc::clone(&self);
        r.command("boom", Tier::Tenant, Arity::Any, move |_| {
            me.handler_runs.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::new("exploded"))
        })?;

        let me = Arc::clone(&self);
        r.command("panic", Tier::Tenant, Arity::Any, move |_| {
            me.handler_runs.fetch_add(1, Ordering::SeqCst);
            panic!("handler bug");
        })?;
        Ok(())
    }

    fn on_api_call(&self, _caller: &ModuleIdentity, _command: &str) -> Option<bool> {
        self.api_calls.fetch_add(1, Ordering::SeqCst);
        None
    }

    fn on_bridge_call(&self, _source_dist: &str, _command: &str) -> Option<bool> {
        self.bridge_calls.fetch_add(1, Ordering::SeqCst);
        None
    }

    fn on_tenant_call(&self, _tenant_id: &str, _dist: &str, _command: &str) -> Option<bool> {
        self.tenant_calls.fetch_add(1, Ordering::SeqCst);
        None
    }
}

/// Distributor `d` hosting the spy as module `m`.
pub fn spy_distributor(spy: &Arc<Spy>, gates: GatePolicy) -> Arc<Distributor> {
    let mut builder = CommandRegistryBuilder::new(DIST).with_gates(gates);
    builder
        .module(Arc::clone(spy))
        .expect("spy registers cleanly");
    Arc::new(Distributor::new(builder.build(), ExecutionMode::Network))
}

/// Directory that counts lookups, to prove a request never reached it.
pub struct CountingDirectory {
    inner: StaticDirectory,
    pub lookups: AtomicUsize,
}

impl CountingDirectory {
    pub fn new(distributor: Arc<Distributor>) -> Arc<Self> {
        Arc::new(Self {
            inner: StaticDirectory::new().with(distributor),
            lookups: AtomicUsize::new(0),
        })
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl DistributorDirectory for CountingDirectory {
    fn resolve(&self, dist: &str) -> Option<Arc<Distributor>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(dist)
    }
}

pub fn authenticator(replay: ReplayMode) -> Authenticator {
    let store = StaticSecretStore::new().with_tenant(TENANT, TenantSecrets::new(secret(GOOD_KEY)));
    Authenticator::new(Arc::new(store), WINDOW_SECS, replay)
}

pub fn signer(key: u8, replay: ReplayMode) -> Signer {
    Signer::new(TENANT, secret(key), replay)
}

pub fn handler(directory: Arc<dyn DistributorDirectory>, replay: ReplayMode) -> BridgeHandler {
    BridgeHandler::new(
        directory,
        Arc::new(authenticator(replay)),
        Arc::new(BridgeMetrics::new()),
    )
}

/// A running L4 endpoint on an ephemeral loopback port.
pub struct LiveEndpoint {
    pub url: String,
    service: BridgeService,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl LiveEndpoint {
    pub async fn start(handler: BridgeHandler) -> Self {
        Self::start_with(ServerConfig::default(), handler).await
    }

    pub async fn start_with(config: ServerConfig, handler: BridgeHandler) -> Self {
        let mut service = BridgeService::new(config, Arc::new(handler));
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
        let addr = listener.local_addr().expect("bound address");
        let task = service.spawn(listener);
        Self {
            url: format!("http://{addr}{BRIDGE_PATH}"),
            service,
            task: Some(task),
        }
    }

    pub async fn stop(mut self) {
        self.service.shutdown();
        if let Some(task) = self.task.take() {
            task.await.expect("server task").expect("server exited cleanly");
        }
    }
}

/// Request body in canonical field order.
pub fn body(dist: &str, module: &str, command: &str, args: Vec<Value>) -> Vec<u8> {
    bridge_types::Request::new(dist, module, command, args)
        .to_body()
        .expect("serializable request")
}

/// Raw signed POST, for assertions on the HTTP status itself.
pub async fn post_signed(
    url: &str,
    body: Vec<u8>,
    signer: &Signer,
    timestamp: u64,
) -> (u16, Value) {
    let signed = signer.sign(&body, timestamp);
    let mut request = reqwest::Client::new()
        .post(url)
        .header(HEADER_TENANT_ID, &signed.tenant_id)
        .header(HEADER_TIMESTAMP, signed.timestamp.to_string())
        .header(HEADER_SIGNATURE, &signed.signature);
    if let Some(nonce) = &signed.nonce {
        request = request.header(HEADER_NONCE, nonce);
    }
    let response = request.body(body).send().await.expect("endpoint reachable");
    let status = response.status().as_u16();
    let envelope = response.json::<Value>().await.expect("JSON envelope");
    (status, envelope)
}
