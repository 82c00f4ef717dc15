//! trestle-bridge - script-engine/native bridge runtime.
//!
//! A module registry, a per-method calling-convention dispatcher, two
//! interchangeable argument-marshaling strategies, and the wire protocol
//! carrying calls and their results between a script engine and native host
//! code.
//!
//! # Data flow
//!
//! Script code issues a named call; the [`transport::Bridge`] serializes it
//! into the engine and receives a flushed queue of native calls the engine
//! produced while handling it. After wholesale framing validation, each
//! `(moduleId, methodId, args)` entry is dispatched in order onto the
//! native-execution queue, where the addressed method's cached invoker
//! marshals the arguments and runs native logic. Callback- and
//! Promise-classified methods later re-enter the engine through the
//! callback-resolution entry point, and a single batch-completion signal
//! follows the whole queue.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use trestle_bridge::{
//!     method, param, NativeModule, ModuleRegistry, NoopCallbackSink, ParamType,
//! };
//! use trestle_queue::{ActionQueue, QueueUiContext};
//!
//! let ui = Arc::new(QueueUiContext::new(Arc::new(ActionQueue::new(Arc::new(|_| {})))));
//! let registry = ModuleRegistry::builder(ui)
//!     .add(
//!         NativeModule::new("Echo").with_method(method(
//!             "say",
//!             vec![param("text", ParamType::Str)],
//!             |args| {
//!                 let _text = args.str_at(0)?;
//!                 Ok(None)
//!             },
//!         )),
//!     )
//!     .unwrap()
//!     .build()
//!     .unwrap();
//!
//! let sink: Arc<dyn trestle_bridge::CallbackSink> = Arc::new(NoopCallbackSink);
//! registry.invoke(&sink, 0, 0, &[json!("hello")]).unwrap();
//! ```

pub mod callback;
pub mod error;
pub mod instrument;
pub mod marshal;
pub mod method;
pub mod module;
pub mod registry;
pub mod script_module;
pub mod transport;
pub mod value;

pub use callback::{
    Callback, CallbackSink, CallbackSinkRef, NoopCallbackSink, Promise, UNSPECIFIED_ERROR_CODE,
};
pub use error::{BridgeError, BridgeResult};
pub use instrument::{Instrumentation, InstrumentationRef, ScopeGuard, TracingInstrumentation};
pub use marshal::{
    Args, CompiledInvokerFactory, DynamicInvokerFactory, InvokerFactory, MethodInvoker, NativeArg,
};
pub use method::{
    MethodDecl, MethodKind, MethodResult, Param, ParamType, ReturnShape, classify, method, param,
    sync_method,
};
pub use module::{ModuleHook, NativeModule};
pub use registry::{ModuleRegistry, ModuleRegistryBuilder};
pub use script_module::{
    InvocationHandler, ScriptModule, ScriptModuleDescriptor, ScriptModuleRegistry,
    ScriptModuleRegistryBuilder, ScriptStub,
};
pub use transport::{
    Bridge, BridgeCallbackSink, BridgeFaultHandler, BridgeSink, FlushedQueue, RegistryBridgeSink,
    ScriptExecutor,
};
pub use value::WireValue;
