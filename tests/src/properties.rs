//! # Dispatch Properties
//!
//! proptest over the registry and the L2 wire path.

use crate::fixtures::*;
use bridge_registry::{
    handler as make_handler, Arity, BridgeCall, CommandRegistry, CommandRegistryBuilder, Distributor,
    ExecutionMode, GatePolicy, Tier,
};
use bridge_transport::handle_stdio_request;
use bridge_types::{Envelope, ErrorKind, ModuleIdentity, Request};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const MAX_ARITY: usize = 4;

/// `c0`..`c4`, each taking exactly its index in arguments and reporting
/// what it received.
fn arity_registry(runs: &Arc<AtomicUsize>) -> CommandRegistry {
    let module = ModuleIdentity::new(DIST, MODULE);
    let mut builder = CommandRegistryBuilder::new(DIST);
    for n in 0..=MAX_ARITY {
        let runs = Arc::clone(runs);
        builder
            .register(
                &module,
                &format!("c{n}"),
                Tier::Tenant,
                Arity::Exact(n),
                make_handler(move |args| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"arity": n, "args": args}))
                }),
            )
            .unwrap();
    }
    builder.build()
}

fn json_safe() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        (-1.0e9f64..1.0e9).prop_map(Value::from),
        "\\PC{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop::collection::vec(inner, 0..4).prop_map(Value::Array)
    })
}

fn bridge<'a>(command: &'a str, args: &'a [Value]) -> BridgeCall<'a> {
    BridgeCall {
        source_dist: DIST,
        module: MODULE,
        command,
        args,
        origin: Tier::Bridge,
    }
}

proptest! {
    #[test]
    fn prop_matching_arity_dispatches(
        n in 0..=MAX_ARITY,
        pool in prop::collection::vec(json_safe(), MAX_ARITY),
    ) {
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = arity_registry(&runs);
        let args = &pool[..n];

        let data = registry.execute_bridge(bridge(&format!("c{n}"), args)).unwrap();
        prop_assert_eq!(data, json!({"arity": n, "args": args}));
        prop_assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn prop_wrong_arity_never_runs(
        n in 0..=MAX_ARITY,
        given in 0..=MAX_ARITY + 2,
    ) {
        prop_assume!(n != given);
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = arity_registry(&runs);
        let args = vec![Value::Null; given];

        let err = registry.execute_bridge(bridge(&format!("c{n}"), &args)).unwrap_err();
        prop_assert_eq!(err.kind, ErrorKind::ValidationError);
        prop_assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prop_unregistered_is_not_found(name in "[a-zA-Z_][a-zA-Z0-9_]{0,16}") {
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = arity_registry(&runs);
        prop_assume!(registry.lookup(MODULE, &name).is_none());

        let err = registry.execute_bridge(bridge(&name, &[])).unwrap_err();
        prop_assert_eq!(err.kind, ErrorKind::NotFoundError);
        prop_assert_eq!(Envelope::from_error(&err).code(), Some(404));
        prop_assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn prop_l2_wire_path_is_lossless(args in prop::collection::vec(json_safe(), 0..=MAX_ARITY)) {
        let runs = Arc::new(AtomicUsize::new(0));
        let distributor = Arc::new(Distributor::new(arity_registry(&runs), ExecutionMode::Network));
        let directory = CountingDirectory::new(distributor);

        let body = Request::new(DIST, MODULE, format!("c{}", args.len()), args.clone())
            .to_body()
            .unwrap();
        let line = handle_stdio_request(directory.as_ref(), &body, None).to_json_string();
        let data = Envelope::decode(line.as_bytes()).unwrap().into_result().unwrap();

        prop_assert_eq!(data, json!({"arity": args.len(), "args": args}));
    }

    #[test]
    fn prop_bad_module_never_looked_up(
        prefix in "[a-z]{0,4}",
        bad in "[.\\\\ :;%$@!?<>]{1,3}",
        suffix in "[a-z]{0,4}",
    ) {
        let spy = Spy::new();
        let directory = CountingDirectory::new(spy_distributor(&spy, GatePolicy::default()));
        let module = format!("{prefix}{bad}{suffix}");
        let body = serde_json::to_vec(&json!({
            "dist": DIST, "module": module, "command": "ping", "args": []
        }))
        .unwrap();

        let envelope = handle_stdio_request(directory.as_ref(), &body, None);
        prop_assert_eq!(envelope.code(), Some(400));
        prop_assert_eq!(directory.lookups(), 0);
        prop_assert_eq!(spy.gate_calls(), 0);
    }
}
