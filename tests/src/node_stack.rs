//! # Node Stack
//!
//! A node built from a config file on disk, with an embedder module
//! installed next to `core`, reached over signed HTTP.

use crate::fixtures::*;
use bridge_node::{Node, NodeConfig, CORE_MODULE};
use bridge_transport::{ClientConfig, TenantEmitter};
use bridge_types::{ErrorKind, ModuleIdentity, ReplayMode};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;

fn config_file(replay: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
        [node]
        dist = "{DIST}"

        [security]
        window_secs = {WINDOW_SECS}
        replay = "{replay}"

        [security.tenants.{TENANT}]
        secret = "{}"

        [gates.defaults]
        tenant = "deny"

        [gates.modules.{MODULE}]
        tenant = "allow"
        "#,
        hex::encode([GOOD_KEY; 32])
    )
    .unwrap();
    file
}

fn spy_node(replay: &str) -> (Node, Arc<Spy>) {
    let file = config_file(replay);
    let config = NodeConfig::from_file(file.path()).unwrap();
    let spy = Spy::new();
    let installed = Arc::clone(&spy);
    let node = Node::with_modules(config, move |builder| {
        builder.module(Arc::clone(&installed))?;
        Ok(())
    })
    .unwrap();
    (node, spy)
}

#[tokio::test]
async fn node_from_file_serves_tenants() {
    let (node, spy) = spy_node("timestamp");
    let endpoint = LiveEndpoint::start(node.bridge_handler().unwrap()).await;
    let emitter = TenantEmitter::new(
        endpoint.url.clone(),
        signer(GOOD_KEY, ReplayMode::TimestampOnly),
        ClientConfig::default(),
    )
    .unwrap();

    assert_eq!(emitter.call(DIST, MODULE, "ping", vec![]).await.unwrap(), "pong");
    assert_eq!(spy.tenant_calls.load(std::sync::atomic::Ordering::SeqCst), 1);

    // `core` falls under the deny-by-default tenant policy.
    let err = emitter
        .call(DIST, CORE_MODULE, "ping", vec![])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::PermissionError);

    endpoint.stop().await;
}

#[tokio::test]
async fn node_nonce_mode_from_file() {
    let (node, spy) = spy_node("timestamp_nonce");
    let endpoint = LiveEndpoint::start(node.bridge_handler().unwrap()).await;
    let emitter = TenantEmitter::new(
        endpoint.url.clone(),
        signer(GOOD_KEY, ReplayMode::TimestampAndNonce),
        ClientConfig::default(),
    )
    .unwrap();

    for _ in 0..2 {
        assert_eq!(emitter.call(DIST, MODULE, "ping", vec![]).await.unwrap(), "pong");
    }
    assert_eq!(spy.handler_runs(), 2);

    // A signer that omits nonces cannot talk to a nonce-mode node.
    let plain = TenantEmitter::new(
        endpoint.url.clone(),
        signer(GOOD_KEY, ReplayMode::TimestampOnly),
        ClientConfig::default(),
    )
    .unwrap();
    let err = plain.call(DIST, MODULE, "ping", vec![]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AuthError);

    endpoint.stop().await;
}

#[test]
fn core_describe_lists_installed_module() {
    let (node, _spy) = spy_node("timestamp");
    let emitter = node
        .distributor()
        .emitter(ModuleIdentity::new(DIST, "caller"), CORE_MODULE);

    let catalog = emitter.invoke("describe", &[]).unwrap();
    let names: Vec<_> = catalog
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| format!("{}.{}", entry["module"].as_str().unwrap(), entry["command"].as_str().unwrap()))
        .collect();
    assert!(names.contains(&format!("{MODULE}.add")));
    assert!(names.contains(&format!("{CORE_MODULE}.ping")));

    node.reload().unwrap();
    assert_eq!(emitter.invoke("describe", &[]).unwrap(), catalog);
    assert_eq!(
        node.distributor()
            .emitter(ModuleIdentity::new(DIST, "caller"), MODULE)
            .invoke("add", &[json!(1), json!(2)])
            .unwrap(),
        json!(3.0)
    );
}
