//! Argument marshaling: wire values in, typed native arguments out.
//!
//! Two interchangeable strategies implement the same [`MethodInvoker`]
//! contract. [`DynamicInvokerFactory`] re-derives every conversion at call
//! time by matching the declared parameter type; [`CompiledInvokerFactory`]
//! builds one monomorphic extractor closure per parameter the first time a
//! method shape is seen and caches the plan keyed by that shape. For
//! identical inputs the two must be observably identical, including which
//! parameter a failure names.

use crate::callback::{Callback, CallbackSinkRef, Promise, UNSPECIFIED_ERROR_CODE};
use crate::error::{BridgeError, BridgeResult};
use crate::method::{MethodDecl, MethodHandler, MethodKind, Param, ParamType, classify};
use crate::value::{WireValue, wire_kind};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// One marshaled native argument.
#[derive(Clone, Debug)]
pub enum NativeArg {
    /// Null, only where the parameter was declared optional.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point number.
    Double(f64),
    /// String.
    Str(String),
    /// Wire array, unconverted elements.
    Array(Vec<WireValue>),
    /// Wire map, unconverted values.
    Map(serde_json::Map<String, WireValue>),
    /// The raw wire value.
    Raw(WireValue),
    /// Script-side callback.
    Callback(Callback),
    /// Script-side promise.
    Promise(Promise),
}

/// Marshaled arguments handed to a method handler, with typed accessors.
#[derive(Debug)]
pub struct Args {
    values: Vec<NativeArg>,
}

macro_rules! typed_accessor {
    ($fn_name:ident, $variant:ident, $ty:ty, $what:literal) => {
        /// Typed accessor; errors if the argument at `index` is not of this type.
        pub fn $fn_name(&self, index: usize) -> BridgeResult<$ty> {
            match self.values.get(index) {
                Some(NativeArg::$variant(v)) => Ok(v.clone()),
                Some(other) => Err(BridgeError::invalid_operation(format!(
                    "argument {index} is not {}, got {other:?}",
                    $what
                ))),
                None => Err(BridgeError::invalid_operation(format!(
                    "argument index {index} out of range"
                ))),
            }
        }
    };
}

impl Args {
    pub(crate) fn new(values: Vec<NativeArg>) -> Self {
        Self { values }
    }

    /// Number of marshaled arguments (completion parameters included).
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the method takes no parameters.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when the argument at `index` marshaled to null.
    pub fn is_null_at(&self, index: usize) -> bool {
        matches!(self.values.get(index), Some(NativeArg::Null))
    }

    typed_accessor!(bool_at, Bool, bool, "a bool");
    typed_accessor!(int_at, Int, i64, "an int");
    typed_accessor!(double_at, Double, f64, "a double");
    typed_accessor!(str_at, Str, String, "a string");
    typed_accessor!(array_at, Array, Vec<WireValue>, "an array");
    typed_accessor!(map_at, Map, serde_json::Map<String, WireValue>, "a map");
    typed_accessor!(raw_at, Raw, WireValue, "a raw value");
    typed_accessor!(callback_at, Callback, Callback, "a callback");
    typed_accessor!(promise_at, Promise, Promise, "a promise");
}

/// A built, reusable invoker for one method: marshal, call, classify errors.
pub trait MethodInvoker: Send + Sync {
    /// The method's calling convention.
    fn kind(&self) -> MethodKind;

    /// Marshal `args` and run the method body. `Some` only for sync methods.
    fn invoke(
        &self,
        sink: &CallbackSinkRef,
        args: &[WireValue],
    ) -> BridgeResult<Option<WireValue>>;
}

/// Builds invokers at registry-build time; classification errors fail fast.
pub trait InvokerFactory {
    /// Classify `decl` and build its invoker.
    fn create(&self, module: &str, decl: MethodDecl) -> BridgeResult<Arc<dyn MethodInvoker>>;
}

// Wire layout: data parameters occupy slots [0, data_len); trailing
// Callback/Promise parameters occupy the callback-id slots after them.
fn wire_layout(params: &[Param]) -> (usize, usize) {
    let data_len = params.iter().take_while(|p| !p.ty.is_completion()).count();
    let full_len = data_len
        + params[data_len..]
            .iter()
            .map(|p| p.ty.wire_slots())
            .sum::<usize>();
    (data_len, full_len)
}

// Accepted wire lengths: exactly the data parameters (callback ids omitted,
// no-op callbacks) or data parameters plus every callback-id slot.
fn check_arity(
    module: &str,
    method: &str,
    got: usize,
    data_len: usize,
    full_len: usize,
) -> BridgeResult<()> {
    if got == data_len || got == full_len {
        return Ok(());
    }
    let expected = if data_len == full_len {
        format!("'{full_len}'")
    } else {
        format!("'{data_len}' or '{full_len}'")
    };
    Err(BridgeError::ArgumentParse {
        module: module.to_string(),
        method: method.to_string(),
        param: "args".to_string(),
        message: format!("got '{got}' arguments, expected {expected}"),
    })
}

// A conversion failure, named by parameter position; the invoker resolves
// the position to the declared parameter name.
struct ArgFault {
    param_index: usize,
    message: String,
}

fn fault_to_error(module: &str, method: &str, params: &[Param], fault: ArgFault) -> BridgeError {
    BridgeError::ArgumentParse {
        module: module.to_string(),
        method: method.to_string(),
        param: params[fault.param_index].name.to_string(),
        message: format!(
            "error extracting argument at index '{}': {}",
            fault.param_index, fault.message
        ),
    }
}

fn convert_data(ty: &ParamType, value: &WireValue) -> Result<NativeArg, String> {
    match ty {
        ParamType::Bool => value
            .as_bool()
            .map(NativeArg::Bool)
            .ok_or_else(|| mismatch("bool", value)),
        ParamType::Int => value
            .as_i64()
            .map(NativeArg::Int)
            .ok_or_else(|| mismatch("int", value)),
        ParamType::Double => value
            .as_f64()
            .map(NativeArg::Double)
            .ok_or_else(|| mismatch("double", value)),
        ParamType::Str => value
            .as_str()
            .map(|s| NativeArg::Str(s.to_string()))
            .ok_or_else(|| mismatch("string", value)),
        ParamType::Array => value
            .as_array()
            .cloned()
            .map(NativeArg::Array)
            .ok_or_else(|| mismatch("array", value)),
        ParamType::Map => value
            .as_object()
            .cloned()
            .map(NativeArg::Map)
            .ok_or_else(|| mismatch("map", value)),
        ParamType::Raw => Ok(NativeArg::Raw(value.clone())),
        ParamType::Optional(inner) => {
            if value.is_null() {
                Ok(NativeArg::Null)
            } else {
                convert_data(inner, value)
            }
        }
        ParamType::Callback | ParamType::Promise => {
            unreachable!("completion parameters are extracted from callback-id slots")
        }
    }
}

fn mismatch(expected: &str, value: &WireValue) -> String {
    format!("expected {expected}, got {}", wire_kind(value))
}

// A callback-id slot: absent or null yields a no-op callback.
fn callback_from_slot(
    slot: Option<&WireValue>,
    sink: &CallbackSinkRef,
) -> Result<Callback, String> {
    match slot {
        None | Some(WireValue::Null) => Ok(Callback::no_op(sink.clone())),
        Some(value) => value
            .as_u64()
            .map(|id| Callback::new(id, sink.clone()))
            .ok_or_else(|| mismatch("callback id", value)),
    }
}

// Run the handler and map its outcome per calling convention: promise-method
// faults become rejections, everything else propagates to the embedder.
fn run_handler(
    kind: MethodKind,
    module: &str,
    method: &str,
    handler: &MethodHandler,
    values: Vec<NativeArg>,
) -> BridgeResult<Option<WireValue>> {
    let promise = match (kind, values.last()) {
        (MethodKind::Promise, Some(NativeArg::Promise(p))) => Some(p.clone()),
        _ => None,
    };

    match handler(Args::new(values)) {
        Ok(result) => Ok(match kind {
            MethodKind::Sync => Some(result.unwrap_or(WireValue::Null)),
            _ => None,
        }),
        Err(err) => {
            if let Some(promise) = promise {
                warn!(module, method, error = %err, "promise method failed, rejecting");
                promise.reject(UNSPECIFIED_ERROR_CODE, &err.to_string())?;
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dynamic strategy
// ---------------------------------------------------------------------------

/// Builds invokers that match the declared parameter type on every call.
///
/// No precomputation; simplest to extend; adequate for rarely-called or
/// highly heterogeneous methods.
#[derive(Debug, Default)]
pub struct DynamicInvokerFactory;

struct DynamicInvoker {
    module: String,
    kind: MethodKind,
    decl: MethodDecl,
    data_len: usize,
    full_len: usize,
}

impl InvokerFactory for DynamicInvokerFactory {
    fn create(&self, module: &str, decl: MethodDecl) -> BridgeResult<Arc<dyn MethodInvoker>> {
        let kind = classify(&decl)?;
        let (data_len, full_len) = wire_layout(&decl.params);
        Ok(Arc::new(DynamicInvoker {
            module: module.to_string(),
            kind,
            decl,
            data_len,
            full_len,
        }))
    }
}

impl MethodInvoker for DynamicInvoker {
    fn kind(&self) -> MethodKind {
        self.kind
    }

    fn invoke(
        &self,
        sink: &CallbackSinkRef,
        args: &[WireValue],
    ) -> BridgeResult<Option<WireValue>> {
        check_arity(
            &self.module,
            &self.decl.name,
            args.len(),
            self.data_len,
            self.full_len,
        )?;

        let mut values = Vec::with_capacity(self.decl.params.len());
        let mut wire_index = 0usize;
        for (param_index, param) in self.decl.params.iter().enumerate() {
            let extracted = match &param.ty {
                ParamType::Callback => {
                    callback_from_slot(args.get(wire_index), sink).map(NativeArg::Callback)
                }
                ParamType::Promise => {
                    let resolve = callback_from_slot(args.get(wire_index), sink);
                    let reject = callback_from_slot(args.get(wire_index + 1), sink);
                    match (resolve, reject) {
                        (Ok(resolve), Ok(reject)) => {
                            Ok(NativeArg::Promise(Promise::new(resolve, reject)))
                        }
                        (Err(e), _) | (_, Err(e)) => Err(e),
                    }
                }
                ty => convert_data(ty, &args[wire_index]),
            };
            let value = extracted.map_err(|message| {
                fault_to_error(
                    &self.module,
                    &self.decl.name,
                    &self.decl.params,
                    ArgFault {
                        param_index,
                        message,
                    },
                )
            })?;
            wire_index += param.ty.wire_slots();
            values.push(value);
        }

        run_handler(
            self.kind,
            &self.module,
            &self.decl.name,
            &self.decl.handler,
            values,
        )
    }
}

// ---------------------------------------------------------------------------
// Compiled strategy
// ---------------------------------------------------------------------------

type Extractor =
    Box<dyn Fn(&[WireValue], &CallbackSinkRef) -> Result<NativeArg, ArgFault> + Send + Sync>;

struct CompiledPlan {
    data_len: usize,
    full_len: usize,
    extractors: Vec<Extractor>,
}

// One plan per distinct method shape; the shape is the parameter type list.
// Parameter names and handlers stay per-method, so plans are shareable.
static PLAN_CACHE: Lazy<Mutex<HashMap<Vec<ParamType>, Arc<CompiledPlan>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn compile_extractor(param_index: usize, wire_index: usize, ty: &ParamType) -> Extractor {
    match ty {
        ParamType::Callback => Box::new(move |args, sink| {
            callback_from_slot(args.get(wire_index), sink)
                .map(NativeArg::Callback)
                .map_err(|message| ArgFault {
                    param_index,
                    message,
                })
        }),
        ParamType::Promise => Box::new(move |args, sink| {
            let resolve = callback_from_slot(args.get(wire_index), sink);
            let reject = callback_from_slot(args.get(wire_index + 1), sink);
            match (resolve, reject) {
                (Ok(resolve), Ok(reject)) => Ok(NativeArg::Promise(Promise::new(resolve, reject))),
                (Err(message), _) | (_, Err(message)) => Err(ArgFault {
                    param_index,
                    message,
                }),
            }
        }),
        data_ty => {
            let data_ty = data_ty.clone();
            Box::new(move |args, _sink| {
                convert_data(&data_ty, &args[wire_index]).map_err(|message| ArgFault {
                    param_index,
                    message,
                })
            })
        }
    }
}

fn compile_plan(params: &[Param]) -> Arc<CompiledPlan> {
    let shape: Vec<ParamType> = params.iter().map(|p| p.ty.clone()).collect();
    let mut cache = PLAN_CACHE.lock();
    if let Some(plan) = cache.get(&shape) {
        return plan.clone();
    }

    let (data_len, full_len) = wire_layout(params);
    let mut extractors = Vec::with_capacity(params.len());
    let mut wire_index = 0usize;
    for (param_index, param) in params.iter().enumerate() {
        extractors.push(compile_extractor(param_index, wire_index, &param.ty));
        wire_index += param.ty.wire_slots();
    }

    let plan = Arc::new(CompiledPlan {
        data_len,
        full_len,
        extractors,
    });
    cache.insert(shape, plan.clone());
    plan
}

/// Builds invokers that precompile one extractor per parameter and cache the
/// plan per method shape. Intended for hot paths.
#[derive(Debug, Default)]
pub struct CompiledInvokerFactory;

struct CompiledInvoker {
    module: String,
    name: String,
    kind: MethodKind,
    params: Vec<Param>,
    handler: MethodHandler,
    plan: Arc<CompiledPlan>,
}

impl InvokerFactory for CompiledInvokerFactory {
    fn create(&self, module: &str, decl: MethodDecl) -> BridgeResult<Arc<dyn MethodInvoker>> {
        let kind = classify(&decl)?;
        let plan = compile_plan(&decl.params);
        Ok(Arc::new(CompiledInvoker {
            module: module.to_string(),
            name: decl.name,
            kind,
            params: decl.params,
            handler: decl.handler,
            plan,
        }))
    }
}

impl MethodInvoker for CompiledInvoker {
    fn kind(&self) -> MethodKind {
        self.kind
    }

    fn invoke(
        &self,
        sink: &CallbackSinkRef,
        args: &[WireValue],
    ) -> BridgeResult<Option<WireValue>> {
        check_arity(
            &self.module,
            &self.name,
            args.len(),
            self.plan.data_len,
            self.plan.full_len,
        )?;

        let mut values = Vec::with_capacity(self.plan.extractors.len());
        for extractor in &self.plan.extractors {
            let value = extractor(args, sink).map_err(|fault| {
                fault_to_error(&self.module, &self.name, &self.params, fault)
            })?;
            values.push(value);
        }

        run_handler(self.kind, &self.module, &self.name, &self.handler, values)
    }
}
