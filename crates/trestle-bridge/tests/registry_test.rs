//! Integration tests for the module/method registry.

use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use trestle_bridge::{
    BridgeError, CallbackSink, ModuleRegistry, NativeModule, NoopCallbackSink, ParamType,
    ReturnShape, method, param, sync_method,
};
use trestle_queue::{ActionQueue, QueueUiContext, UiContext};

fn ui_queue() -> (Arc<ActionQueue>, Arc<dyn UiContext>) {
    let queue = Arc::new(ActionQueue::with_name("ui", Arc::new(|_| {})));
    let ui: Arc<dyn UiContext> = Arc::new(QueueUiContext::new(queue.clone()));
    (queue, ui)
}

fn sink() -> Arc<dyn CallbackSink> {
    Arc::new(NoopCallbackSink)
}

#[test]
fn ids_follow_declaration_order_and_survive_build() {
    let (_q, ui) = ui_queue();
    let registry = ModuleRegistry::builder(ui)
        .add(NativeModule::new("First").with_method(method("a", vec![], |_| Ok(None))))
        .unwrap()
        .add(NativeModule::new("Second").with_method(method("b", vec![], |_| Ok(None))))
        .unwrap()
        .add(NativeModule::new("Third"))
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(registry.module_names(), vec!["First", "Second", "Third"]);
    // The manifest reflects the same assignment.
    let manifest = registry.describe_for_script();
    assert_eq!(manifest[0][0], json!("First"));
    assert_eq!(manifest[1][0], json!("Second"));
    assert_eq!(manifest[2][0], json!("Third"));
}

#[test]
fn out_of_range_module_id_never_touches_module_state() {
    let (_q, ui) = ui_queue();
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    let registry = ModuleRegistry::builder(ui)
        .add(NativeModule::new("Counter").with_method(method("bump", vec![], move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })))
        .unwrap()
        .build()
        .unwrap();

    let err = registry.invoke(&sink(), 1, 0, &[]).unwrap_err();
    assert_eq!(err.param_name(), Some("module_id"));
    let err = registry.invoke(&sink(), 99, 0, &[]).unwrap_err();
    assert_eq!(err.param_name(), Some("module_id"));
    let err = registry.invoke(&sink(), 0, 3, &[]).unwrap_err();
    assert_eq!(err.param_name(), Some("method_id"));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[test]
fn normal_methods_accumulate_side_effects_exactly_n_times() {
    let (_q, ui) = ui_queue();
    let counter = Arc::new(AtomicUsize::new(0));
    let sum = Arc::new(AtomicI64::new(0));
    let c = counter.clone();
    let s = sum.clone();
    let registry = ModuleRegistry::builder(ui)
        .add(
            NativeModule::new("Counter")
                .with_method(method("bump", vec![], move |_| {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }))
                .with_method(method("addTo", vec![param("n", ParamType::Int)], move |args| {
                    s.fetch_add(args.int_at(0)?, Ordering::SeqCst);
                    Ok(None)
                })),
        )
        .unwrap()
        .build()
        .unwrap();

    registry.invoke(&sink(), 0, 0, &[]).unwrap();
    registry.invoke(&sink(), 0, 0, &[]).unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);

    registry.invoke(&sink(), 0, 1, &[json!(42)]).unwrap();
    registry.invoke(&sink(), 0, 1, &[json!(17)]).unwrap();
    assert_eq!(sum.load(Ordering::SeqCst), 59);
}

#[test]
fn override_requires_opt_in_and_keeps_position() {
    let (_q, ui) = ui_queue();

    let err = ModuleRegistry::builder(ui.clone())
        .add(NativeModule::new("Dup"))
        .unwrap()
        .add(NativeModule::new("Dup"))
        .unwrap_err();
    assert!(matches!(err, BridgeError::InvalidOperation(_)));

    let registry = ModuleRegistry::builder(ui)
        .add(NativeModule::new("A"))
        .unwrap()
        .add(NativeModule::new("B").with_constant("v", json!(1)))
        .unwrap()
        .add(NativeModule::new("C"))
        .unwrap()
        .add(
            NativeModule::new("B")
                .with_constant("v", json!(2))
                .with_can_override(true),
        )
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(registry.module_names(), vec!["A", "B", "C"]);
    let manifest = registry.describe_for_script();
    assert_eq!(manifest[1][1], json!({"v": 2}));
}

#[test]
fn empty_module_name_is_rejected() {
    let (_q, ui) = ui_queue();
    let err = ModuleRegistry::builder(ui)
        .add(NativeModule::new(""))
        .unwrap_err();
    assert_eq!(err.param_name(), Some("module"));
}

#[test]
fn registration_shape_errors_prevent_construction() {
    let (_q, ui) = ui_queue();

    // Overloaded method name within one module.
    let err = ModuleRegistry::builder(ui.clone())
        .add(
            NativeModule::new("Over")
                .with_method(method("go", vec![], |_| Ok(None)))
                .with_method(method("go", vec![param("x", ParamType::Int)], |_| Ok(None))),
        )
        .unwrap()
        .build()
        .unwrap_err();
    assert!(matches!(err, BridgeError::NotSupported(_)));

    // Value return without the sync marker.
    let err = ModuleRegistry::builder(ui.clone())
        .add(NativeModule::new("Bad").with_method(
            method("get", vec![], |_| Ok(None)).with_returns(ReturnShape::Value),
        ))
        .unwrap()
        .build()
        .unwrap_err();
    assert!(matches!(err, BridgeError::NotSupported(_)));

    // Bare task-returning method: declared but unreachable.
    let err = ModuleRegistry::builder(ui.clone())
        .add(NativeModule::new("Bad").with_method(
            method("later", vec![], |_| Ok(None)).with_returns(ReturnShape::Task),
        ))
        .unwrap()
        .build()
        .unwrap_err();
    assert!(matches!(err, BridgeError::NotImplemented(_)));

    // Callback not in trailing position.
    let err = ModuleRegistry::builder(ui)
        .add(NativeModule::new("Bad").with_method(method(
            "mixed",
            vec![param("cb", ParamType::Callback), param("x", ParamType::Int)],
            |_| Ok(None),
        )))
        .unwrap()
        .build()
        .unwrap_err();
    assert!(matches!(err, BridgeError::NotSupported(_)));
}

#[test]
fn lifecycle_hooks_run_once_in_registration_order_on_ui_context() {
    let (queue, ui) = ui_queue();
    let events = Arc::new(parking_lot_events::Events::default());

    let registry = {
        let e1 = events.clone();
        let e2 = events.clone();
        let d1 = events.clone();
        Arc::new(
            ModuleRegistry::builder(ui)
                .add(NativeModule::new("One").with_initialize(move || e1.push("init:One")))
                .unwrap()
                .add(
                    NativeModule::new("Two")
                        .with_initialize(move || e2.push("init:Two"))
                        .with_on_dispose(move || d1.push("dispose:Two")),
                )
                .unwrap()
                .build()
                .unwrap(),
        )
    };

    let r = registry.clone();
    queue.run(move || r.notify_initialize()).unwrap();
    let r = registry.clone();
    queue.run(move || r.notify_dispose()).unwrap();

    assert_eq!(events.take(), vec!["init:One", "init:Two", "dispose:Two"]);
}

#[test]
fn batch_complete_listeners_fire_in_collection_order() {
    let (_q, ui) = ui_queue();
    let events = Arc::new(parking_lot_events::Events::default());

    let e1 = events.clone();
    let e2 = events.clone();
    let registry = ModuleRegistry::builder(ui)
        .add(NativeModule::new("Listener1").with_on_batch_complete(move || e1.push("batch:1")))
        .unwrap()
        .add(NativeModule::new("Quiet"))
        .unwrap()
        .add(NativeModule::new("Listener2").with_on_batch_complete(move || e2.push("batch:2")))
        .unwrap()
        .build()
        .unwrap();

    registry.on_batch_complete();
    registry.on_batch_complete();
    assert_eq!(events.take(), vec!["batch:1", "batch:2", "batch:1", "batch:2"]);
}

#[test]
fn manifest_marks_promise_and_sync_method_indices() {
    let (_q, ui) = ui_queue();
    let registry = ModuleRegistry::builder(ui)
        .add(
            NativeModule::new("Storage")
                .with_constant("version", json!(3))
                .with_method(method("clear", vec![], |_| Ok(None)))
                .with_method(method(
                    "get",
                    vec![param("key", ParamType::Str), param("promise", ParamType::Promise)],
                    |_| Ok(None),
                ))
                .with_method(sync_method("size", vec![], |_| Ok(Some(json!(0))))),
        )
        .unwrap()
        .add(NativeModule::new("Bare"))
        .unwrap()
        .build()
        .unwrap();

    let manifest = registry.describe_for_script();
    assert_eq!(
        manifest,
        json!([
            ["Storage", {"version": 3}, ["clear", "get", "size"], [1], [2]],
            ["Bare", {}],
        ])
    );
}

#[test]
fn sync_methods_bypass_the_queued_call_envelope() {
    let (_q, ui) = ui_queue();
    let registry = ModuleRegistry::builder(ui)
        .add(
            NativeModule::new("Math")
                .with_method(sync_method(
                    "square",
                    vec![param("n", ParamType::Int)],
                    |args| {
                        let n = args.int_at(0)?;
                        Ok(Some(json!(n * n)))
                    },
                ))
                .with_method(method("fire", vec![], |_| Ok(None))),
        )
        .unwrap()
        .build()
        .unwrap();

    let value = registry.invoke_sync(&sink(), 0, 0, &[json!(9)]).unwrap();
    assert_eq!(value, json!(81));

    // The queued path rejects sync methods, and vice versa.
    assert!(matches!(
        registry.invoke(&sink(), 0, 0, &[json!(9)]),
        Err(BridgeError::InvalidOperation(_))
    ));
    assert!(matches!(
        registry.invoke_sync(&sink(), 0, 1, &[]),
        Err(BridgeError::InvalidOperation(_))
    ));
}

// Small ordered event log shared by hook tests.
mod parking_lot_events {
    use parking_lot::Mutex;

    #[derive(Default)]
    pub struct Events(Mutex<Vec<&'static str>>);

    impl Events {
        pub fn push(&self, event: &'static str) {
            self.0.lock().push(event);
        }

        pub fn take(&self) -> Vec<&'static str> {
            std::mem::take(&mut self.0.lock())
        }
    }
}
