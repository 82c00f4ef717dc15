//! The dynamic and compiled marshaling strategies must be observably
//! identical: same success values, same error classification, same failing
//! parameter, across every calling convention.

use parking_lot::Mutex;
use serde_json::{Map, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use trestle_bridge::{
    Args, BridgeResult, CallbackSink, CallbackSinkRef, CompiledInvokerFactory,
    DynamicInvokerFactory, InvokerFactory, MethodDecl, MethodResult, ParamType, WireValue,
    method, param, sync_method,
};

#[derive(Default)]
struct RecordingSink {
    deliveries: Mutex<Vec<(u64, Vec<WireValue>)>>,
}

impl CallbackSink for RecordingSink {
    fn invoke_callback(&self, callback_id: u64, args: Vec<WireValue>) -> BridgeResult<()> {
        self.deliveries.lock().push((callback_id, args));
        Ok(())
    }
}

fn factories() -> Vec<(&'static str, Box<dyn InvokerFactory>)> {
    vec![
        ("dynamic", Box::new(DynamicInvokerFactory)),
        ("compiled", Box::new(CompiledInvokerFactory)),
    ]
}

/// Run one declared method through both strategies and return
/// (strategy, result-or-error-string, deliveries) triples.
fn run_both(
    decl_for: impl Fn() -> MethodDecl,
    wire_args: &[WireValue],
) -> Vec<(&'static str, Result<Option<WireValue>, String>, Vec<(u64, Vec<WireValue>)>)> {
    factories()
        .into_iter()
        .map(|(label, factory)| {
            let invoker = factory.create("Sample", decl_for()).unwrap();
            let sink = Arc::new(RecordingSink::default());
            let sink_ref: CallbackSinkRef = sink.clone();
            let outcome = invoker
                .invoke(&sink_ref, wire_args)
                .map_err(|e| e.to_string());
            let deliveries = sink.deliveries.lock().clone();
            (label, outcome, deliveries)
        })
        .collect()
}

fn assert_identical(
    runs: Vec<(&'static str, Result<Option<WireValue>, String>, Vec<(u64, Vec<WireValue>)>)>,
) -> (Result<Option<WireValue>, String>, Vec<(u64, Vec<WireValue>)>) {
    let (_, first_outcome, first_deliveries) = runs[0].clone();
    for (label, outcome, deliveries) in &runs {
        assert_eq!(*outcome, first_outcome, "strategy '{label}' diverged");
        assert_eq!(*deliveries, first_deliveries, "strategy '{label}' diverged");
    }
    (first_outcome, first_deliveries)
}

#[test]
fn normal_method_success_is_identical() {
    let sum = Arc::new(AtomicI64::new(0));
    for (_, factory) in factories() {
        let s = sum.clone();
        let decl = method("addTo", vec![param("n", ParamType::Int)], move |args| {
            s.fetch_add(args.int_at(0)?, Ordering::SeqCst);
            Ok(None)
        });
        let invoker = factory.create("Sample", decl).unwrap();
        let sink: CallbackSinkRef = Arc::new(RecordingSink::default());
        assert_eq!(invoker.invoke(&sink, &[json!(21)]).unwrap(), None);
    }
    assert_eq!(sum.load(Ordering::SeqCst), 42);
}

#[test]
fn arity_errors_are_identical_and_name_args() {
    fn decl() -> MethodDecl {
        method("one", vec![param("n", ParamType::Int)], |_| Ok(None))
    }
    let (outcome, deliveries) = assert_identical(run_both(decl, &[]));
    let message = outcome.unwrap_err();
    assert!(message.contains("(args)"), "got: {message}");
    assert!(message.contains("got '0' arguments, expected '1'"), "got: {message}");
    assert!(deliveries.is_empty());
}

#[test]
fn conversion_errors_are_identical_and_name_the_parameter() {
    fn decl() -> MethodDecl {
        method(
            "pair",
            vec![param("label", ParamType::Str), param("count", ParamType::Int)],
            |_| Ok(None),
        )
    }
    // Null where a non-optional primitive is required.
    let (outcome, _) = assert_identical(run_both(decl, &[json!("x"), json!(null)]));
    let message = outcome.unwrap_err();
    assert!(message.contains("(count)"), "got: {message}");
    assert!(message.contains("index '1'"), "got: {message}");

    // Wrong primitive kind, first parameter.
    let (outcome, _) = assert_identical(run_both(decl, &[json!(5), json!(3)]));
    let message = outcome.unwrap_err();
    assert!(message.contains("(label)"), "got: {message}");
    assert!(message.contains("expected string, got number"), "got: {message}");
}

#[test]
fn callback_method_delivery_is_identical() {
    fn decl() -> MethodDecl {
        method(
            "fetch",
            vec![
                param("key", ParamType::Str),
                param("onSuccess", ParamType::Callback),
                param("onFailure", ParamType::Callback),
            ],
            |args| {
                let key = args.str_at(0)?;
                args.callback_at(1)?.invoke(vec![json!(format!("value:{key}"))])?;
                Ok(None)
            },
        )
    }
    let (outcome, deliveries) = assert_identical(run_both(decl, &[json!("k"), json!(7), json!(8)]));
    assert_eq!(outcome.unwrap(), None);
    assert_eq!(deliveries, vec![(7, vec![json!("value:k")])]);
}

#[test]
fn null_and_missing_callback_ids_become_no_ops_in_both() {
    fn decl() -> MethodDecl {
        method(
            "fetch",
            vec![param("key", ParamType::Str), param("done", ParamType::Callback)],
            |args| {
                let done = args.callback_at(1)?;
                assert!(done.is_no_op());
                done.invoke(vec![json!("dropped")])?;
                Ok(None)
            },
        )
    }
    // Null callback id on the wire.
    let (outcome, deliveries) = assert_identical(run_both(decl, &[json!("k"), json!(null)]));
    assert!(outcome.is_ok());
    assert!(deliveries.is_empty());

    // Callback id omitted entirely.
    let (outcome, deliveries) = assert_identical(run_both(decl, &[json!("k")]));
    assert!(outcome.is_ok());
    assert!(deliveries.is_empty());
}

#[test]
fn promise_resolve_and_reject_are_identical() {
    fn resolving() -> MethodDecl {
        method(
            "load",
            vec![param("key", ParamType::Str), param("promise", ParamType::Promise)],
            |args| {
                let key = args.str_at(0)?;
                args.promise_at(1)?.resolve(json!({"key": key}))?;
                Ok(None)
            },
        )
    }
    // Promise consumes two trailing wire slots: resolve id, reject id.
    let (outcome, deliveries) =
        assert_identical(run_both(resolving, &[json!("k"), json!(11), json!(12)]));
    assert!(outcome.is_ok());
    assert_eq!(deliveries, vec![(11, vec![json!({"key": "k"})])]);

    fn rejecting() -> MethodDecl {
        method(
            "load",
            vec![param("key", ParamType::Str), param("promise", ParamType::Promise)],
            |args| {
                let mut info = Map::new();
                info.insert("key".to_string(), json!(args.str_at(0)?));
                args.promise_at(1)?.reject_with("ENOENT", "no such key", info)?;
                Ok(None)
            },
        )
    }
    let (outcome, deliveries) =
        assert_identical(run_both(rejecting, &[json!("k"), json!(11), json!(12)]));
    assert!(outcome.is_ok());
    assert_eq!(
        deliveries,
        vec![(
            12,
            vec![json!({
                "code": "ENOENT",
                "message": "no such key",
                "userInfo": {"key": "k"},
            })]
        )]
    );
}

#[test]
fn failing_promise_handler_rejects_with_unspecified_code_in_both() {
    fn decl() -> MethodDecl {
        method(
            "load",
            vec![param("promise", ParamType::Promise)],
            |_args: Args| -> MethodResult {
                Err(trestle_bridge::BridgeError::Script("backend down".to_string()))
            },
        )
    }
    let (outcome, deliveries) = assert_identical(run_both(decl, &[json!(1), json!(2)]));
    assert!(outcome.is_ok(), "promise faults become rejections, not errors");
    assert_eq!(deliveries.len(), 1);
    let (id, payload) = &deliveries[0];
    assert_eq!(*id, 2);
    assert_eq!(payload[0]["code"], json!("EUNSPECIFIED"));
    assert!(payload[0]["message"].as_str().unwrap().contains("backend down"));
}

#[test]
fn sync_method_values_are_identical() {
    fn decl() -> MethodDecl {
        sync_method("square", vec![param("n", ParamType::Int)], |args| {
            let n = args.int_at(0)?;
            Ok(Some(json!(n * n)))
        })
    }
    let (outcome, deliveries) = assert_identical(run_both(decl, &[json!(6)]));
    assert_eq!(outcome.unwrap(), Some(json!(36)));
    assert!(deliveries.is_empty());
}

#[test]
fn optional_parameters_admit_null_in_both() {
    fn decl() -> MethodDecl {
        method(
            "configure",
            vec![param("options", ParamType::optional(ParamType::Map))],
            |args| {
                assert!(args.is_null_at(0));
                Ok(None)
            },
        )
    }
    let (outcome, _) = assert_identical(run_both(decl, &[json!(null)]));
    assert!(outcome.is_ok());
}
