//! # End-to-End Scenarios
//!
//! One `ping` command reached through every tier, then the failure paths:
//! handler errors stay inside the dispatcher, malformed identifiers never
//! reach a registry.

use crate::fixtures::*;
use bridge_registry::{GatePolicy, StaticDirectory};
use bridge_transport::{
    handle_stdio_request, serve_stdio, ClientConfig, RetryPolicy, ServerConfig, TenantEmitter,
};
use bridge_types::{current_timestamp, Envelope, ErrorKind, ModuleIdentity, ReplayMode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// SCENARIO A: ping over L1 and L2
// =============================================================================

#[test]
fn scenario_a_l1_emitter() {
    let spy = Spy::new();
    let dist = spy_distributor(&spy, GatePolicy::default());
    let emitter = dist.emitter(ModuleIdentity::new(DIST, "caller"), MODULE);

    assert_eq!(emitter.invoke("ping", &[]).unwrap(), json!("pong"));
    assert_eq!(spy.api_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scenario_a_l2_exact_wire_bytes() {
    let spy = Spy::new();
    let directory = StaticDirectory::new().with(spy_distributor(&spy, GatePolicy::default()));

    let input: &[u8] = br#"{"dist":"d","module":"m","command":"ping","args":[]}"#;
    let mut output = Vec::new();
    serve_stdio(&directory, None, 1024, input, &mut output)
        .await
        .unwrap();

    assert_eq!(output, b"{\"ok\":true,\"data\":\"pong\"}\n");
    assert_eq!(spy.bridge_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

// =============================================================================
// SCENARIO B: signed HTTP call, right and wrong secret
// =============================================================================

#[tokio::test]
async fn scenario_b_l4_correct_and_wrong_secret() {
    let spy = Spy::new();
    let directory = Arc::new(StaticDirectory::new().with(spy_distributor(&spy, GatePolicy::default())));
    let endpoint = LiveEndpoint::start(handler(directory, ReplayMode::TimestampOnly)).await;
    let ping = body(DIST, MODULE, "ping", vec![]);

    let good = signer(GOOD_KEY, ReplayMode::TimestampOnly);
    let (status, envelope) = post_signed(&endpoint.url, ping.clone(), &good, current_timestamp()).await;
    assert_eq!(status, 200);
    assert_eq!(envelope, json!({"ok": true, "data": "pong"}));

    let wrong = signer(0x13, ReplayMode::TimestampOnly);
    let (status, envelope) = post_signed(&endpoint.url, ping, &wrong, current_timestamp()).await;
    assert_eq!(status, 403);
    assert_eq!(envelope["ok"], false);
    assert_eq!(envelope["error"], "Invalid signature");
    assert!(envelope.get("data").is_none());

    // Only the good call got past authentication.
    assert_eq!(spy.handler_runs(), 1);
    endpoint.stop().await;
}

#[tokio::test]
async fn scenario_b_tenant_emitter() {
    let spy = Spy::new();
    let directory = Arc::new(StaticDirectory::new().with(spy_distributor(&spy, GatePolicy::default())));
    let endpoint = LiveEndpoint::start(handler(directory, ReplayMode::TimestampOnly)).await;

    let emitter = TenantEmitter::new(
        endpoint.url.clone(),
        signer(GOOD_KEY, ReplayMode::TimestampOnly),
        ClientConfig::default(),
    )
    .unwrap();
    assert_eq!(emitter.call(DIST, MODULE, "ping", vec![]).await.unwrap(), "pong");
    assert_eq!(
        emitter
            .call(DIST, MODULE, "add", vec![json!(2), json!(0.5)])
            .await
            .unwrap(),
        json!(2.5)
    );

    let impostor = TenantEmitter::new(
        endpoint.url.clone(),
        signer(0x13, ReplayMode::TimestampOnly),
        ClientConfig::default(),
    )
    .unwrap();
    let err = impostor.call(DIST, MODULE, "ping", vec![]).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::AuthError);

    endpoint.stop().await;
}

// =============================================================================
// SCENARIO C: a failing handler does not take the endpoint down
// =============================================================================

#[tokio::test]
async fn scenario_c_handler_error_then_healthy() {
    let spy = Spy::new();
    let directory = Arc::new(StaticDirectory::new().with(spy_distributor(&spy, GatePolicy::default())));
    let endpoint = LiveEndpoint::start(handler(directory, ReplayMode::TimestampOnly)).await;
    let good = signer(GOOD_KEY, ReplayMode::TimestampOnly);

    let (status, envelope) = post_signed(
        &endpoint.url,
        body(DIST, MODULE, "boom", vec![]),
        &good,
        current_timestamp(),
    )
    .await;
    assert_eq!(status, 500);
    assert_eq!(envelope, json!({"ok": false, "error": "exploded", "code": 500}));

    let (status, envelope) = post_signed(
        &endpoint.url,
        body(DIST, MODULE, "panic", vec![]),
        &good,
        current_timestamp(),
    )
    .await;
    assert_eq!(status, 500);
    assert_eq!(envelope["code"], 500);

    let (status, envelope) = post_signed(
        &endpoint.url,
        body(DIST, MODULE, "ping", vec![]),
        &good,
        current_timestamp(),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(envelope, json!({"ok": true, "data": "pong"}));

    endpoint.stop().await;
}

#[tokio::test]
async fn scenario_c_same_client_connection_survives() {
    let spy = Spy::new();
    let directory = Arc::new(StaticDirectory::new().with(spy_distributor(&spy, GatePolicy::default())));
    let endpoint = LiveEndpoint::start(handler(directory, ReplayMode::TimestampOnly)).await;
    let emitter = TenantEmitter::new(
        endpoint.url.clone(),
        signer(GOOD_KEY, ReplayMode::TimestampOnly),
        ClientConfig::default(),
    )
    .unwrap();

    for _ in 0..3 {
        let err = emitter.call(DIST, MODULE, "panic", vec![]).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::HandlerError);
        assert_eq!(emitter.call(DIST, MODULE, "ping", vec![]).await.unwrap(), "pong");
    }
    assert_eq!(spy.handler_runs(), 6);
    endpoint.stop().await;
}

#[test]
fn scenario_c_l1_handler_error_is_typed() {
    let spy = Spy::new();
    let dist = spy_distributor(&spy, GatePolicy::default());
    let emitter = dist.emitter(ModuleIdentity::new(DIST, "caller"), MODULE);

    let err = emitter.invoke("boom", &[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::HandlerError);
    assert_eq!(err.code(), 500);
    assert_eq!(emitter.invoke("ping", &[]).unwrap(), "pong");
}

// =============================================================================
// SCENARIO D: path traversal in an identifier
// =============================================================================

const TRAVERSAL: &str = r#"{"dist":"d","module":"../../etc","command":"ping","args":[]}"#;

#[tokio::test]
async fn scenario_d_l4_rejected_before_lookup() {
    let spy = Spy::new();
    let directory = CountingDirectory::new(spy_distributor(&spy, GatePolicy::default()));
    let endpoint = LiveEndpoint::start(handler(directory.clone(), ReplayMode::TimestampOnly)).await;

    let (status, envelope) = post_signed(
        &endpoint.url,
        TRAVERSAL.as_bytes().to_vec(),
        &signer(GOOD_KEY, ReplayMode::TimestampOnly),
        current_timestamp(),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(envelope["code"], 400);
    assert_eq!(directory.lookups(), 0);
    assert_eq!(spy.gate_calls(), 0);

    endpoint.stop().await;
}

#[test]
fn scenario_d_l2_rejected_before_lookup() {
    let spy = Spy::new();
    let directory = CountingDirectory::new(spy_distributor(&spy, GatePolicy::default()));

    let envelope = handle_stdio_request(directory.as_ref(), TRAVERSAL.as_bytes(), None);
    let err = envelope.into_result().unwrap_err();
    assert_eq!(err.kind, ErrorKind::ValidationError);
    assert_eq!(directory.lookups(), 0);
    assert_eq!(spy.gate_calls(), 0);
}

#[tokio::test]
async fn scenario_d_client_refuses_to_send() {
    // Nothing listens here; validation must fail before any connect.
    let emitter = TenantEmitter::new(
        "http://127.0.0.1:9/_bridge/v1/call",
        signer(GOOD_KEY, ReplayMode::TimestampOnly),
        ClientConfig::default(),
    )
    .unwrap();
    let err = emitter
        .call(DIST, "../../etc", "ping", vec![])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ValidationError);
}

#[test]
fn scenario_d_other_bad_identifiers() {
    let spy = Spy::new();
    let directory = CountingDirectory::new(spy_distributor(&spy, GatePolicy::default()));
    let bodies = [
        r#"{"dist":"d/../x","module":"m","command":"ping","args":[]}"#,
        r#"{"dist":"d","module":"m","command":"9ping","args":[]}"#,
        r#"{"dist":"d","module":"m","command":"pi.ng","args":[]}"#,
        r#"{"dist":"","module":"m","command":"ping","args":[]}"#,
        r#"{"dist":"d","module":"m","command":"ping","args":[{"k":1}]}"#,
        r#"{"dist":"d","module":"m","command":"ping"}"#,
        r#"["d","m","ping",[]]"#,
    ];
    for body in bodies {
        let envelope = handle_stdio_request(directory.as_ref(), body.as_bytes(), None);
        assert_eq!(envelope.code(), Some(400), "{body}");
    }
    assert_eq!(directory.lookups(), 0);
}

#[test]
fn envelope_shapes_are_exclusive() {
    let ok = Envelope::success(Value::Null).to_value();
    assert_eq!(ok, json!({"ok": true, "data": null}));
    let failed = Envelope::failure("nope", 404).to_value();
    assert_eq!(failed, json!({"ok": false, "error": "nope", "code": 404}));
}

#[tokio::test]
async fn oversized_request_is_validation_not_retried() {
    let spy = Spy::new();
    let directory = Arc::new(StaticDirectory::new().with(spy_distributor(&spy, GatePolicy::default())));
    let handler = handler(directory, ReplayMode::TimestampOnly);
    let metrics = handler.metrics();
    let endpoint = LiveEndpoint::start_with(
        ServerConfig {
            max_body_bytes: 64,
            ..ServerConfig::default()
        },
        handler,
    )
    .await;

    let emitter = TenantEmitter::new(
        endpoint.url.clone(),
        signer(GOOD_KEY, ReplayMode::TimestampOnly),
        ClientConfig {
            retry: RetryPolicy::bounded(3, Duration::from_millis(10)),
            ..ClientConfig::default()
        },
    )
    .unwrap();
    let err = emitter
        .call(DIST, MODULE, "boom", vec![json!("x".repeat(200))])
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::ValidationError);
    assert!(!err.is_retryable());
    assert_eq!(metrics.to_json()["requests"]["total"], 1);
    assert_eq!(spy.handler_runs(), 0);
    endpoint.stop().await;
}
