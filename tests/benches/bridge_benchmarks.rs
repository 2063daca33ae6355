//! # Module Bridge Benchmarks
//!
//! Per-call overhead of each tier, without the network:
//!
//! | Path | What is measured |
//! |------|------------------|
//! | L1 | `Emitter::invoke` through the API gate |
//! | L2 | `handle_stdio_request`: parse, validate, gate, dispatch, encode |
//! | L4 auth | `Signer::sign` and `Authenticator::verify` by body size |
//! | Envelope | encode and decode of the wire envelope |

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bridge_registry::{BridgeCall, GatePolicy, StaticDirectory, Tier};
use bridge_tests::fixtures::{authenticator, signer, spy_distributor, Spy, DIST, GOOD_KEY, MODULE};
use bridge_transport::handle_stdio_request;
use bridge_types::{AuthHeaders, Envelope, ModuleIdentity, ReplayMode};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};
use std::time::Duration;

const NOW: u64 = 1_700_000_000;

// ============================================================================
// L1 / bridge dispatch
// ============================================================================

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.measurement_time(Duration::from_secs(5));

    let spy = Spy::new();
    let dist = spy_distributor(&spy, GatePolicy::default());
    let emitter = dist.emitter(ModuleIdentity::new(DIST, "bench"), MODULE);
    let pair = [json!(2), json!(0.5)];

    group.bench_function("l1_emitter_ping", |b| {
        b.iter(|| black_box(emitter.invoke("ping", &[]).unwrap()))
    });
    group.bench_function("l1_emitter_add", |b| {
        b.iter(|| black_box(emitter.invoke("add", black_box(&pair)).unwrap()))
    });
    group.bench_function("execute_bridge_ping", |b| {
        b.iter(|| {
            black_box(
                dist.execute_bridge(BridgeCall {
                    source_dist: "remote",
                    module: MODULE,
                    command: "ping",
                    args: &[],
                    origin: Tier::Bridge,
                })
                .unwrap(),
            )
        })
    });

    let directory = StaticDirectory::new().with(dist.clone());
    let line = br#"{"dist":"d","module":"m","command":"add","args":[2,0.5]}"#;
    group.bench_function("l2_request_line", |b| {
        b.iter(|| black_box(handle_stdio_request(&directory, black_box(line), None).to_json_string()))
    });

    group.finish();
}

// ============================================================================
// L4 authentication
// ============================================================================

fn bench_auth(c: &mut Criterion) {
    let mut group = c.benchmark_group("l4-auth");
    group.measurement_time(Duration::from_secs(5));

    let signer = signer(GOOD_KEY, ReplayMode::TimestampOnly);
    let auth = authenticator(ReplayMode::TimestampOnly);

    for size in [64usize, 1024, 16 * 1024, 256 * 1024] {
        let body = vec![b'x'; size];
        let signed = signer.sign(&body, NOW);
        let timestamp = signed.timestamp.to_string();
        let headers = AuthHeaders {
            tenant_id: Some(&signed.tenant_id),
            timestamp: Some(&timestamp),
            signature: Some(&signed.signature),
            nonce: None,
        };

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("sign", size), &body, |b, body| {
            b.iter(|| black_box(signer.sign(black_box(body), NOW)))
        });
        group.bench_with_input(BenchmarkId::new("verify", size), &body, |b, body| {
            b.iter(|| black_box(auth.verify(&headers, black_box(body), NOW).unwrap()))
        });
    }

    group.finish();
}

// ============================================================================
// Envelope codec
// ============================================================================

fn bench_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope");

    for len in [0usize, 16, 256] {
        let data = Value::Array((0..len).map(|i| json!({"i": i, "s": "value"})).collect());
        let envelope = Envelope::success(data);
        let encoded = envelope.to_json_string();

        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", len), &envelope, |b, e| {
            b.iter(|| black_box(e.to_json_string()))
        });
        group.bench_with_input(BenchmarkId::new("decode", len), &encoded, |b, s| {
            b.iter(|| black_box(Envelope::decode(s.as_bytes()).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_dispatch, bench_auth, bench_envelope);
criterion_main!(benches);
