//! Method declarations and the calling-convention classifier.
//!
//! A method's declared shape (return shape, sync marker, parameter list) is
//! classified once, at registration time, into one of four calling
//! conventions. Shapes the wire protocol cannot carry are rejected there,
//! never at first call.

use crate::error::{BridgeError, BridgeResult};
use crate::marshal::Args;
use crate::value::WireValue;
use std::sync::Arc;

/// How a method signals completion across the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Fire-and-forget: void return, no completion parameter.
    Normal,
    /// One trailing callback, or a trailing (success, failure) pair.
    Callback,
    /// One trailing promise.
    Promise,
    /// Explicitly marked synchronous; may return a value directly.
    Sync,
}

/// Declared type of one native parameter.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// Non-optional boolean.
    Bool,
    /// Non-optional integer.
    Int,
    /// Non-optional floating point number.
    Double,
    /// Non-optional string.
    Str,
    /// Wire array.
    Array,
    /// Wire map.
    Map,
    /// Any wire value, passed through untouched (null included).
    Raw,
    /// Nullable wrapper: null converts to a null argument.
    Optional(Box<ParamType>),
    /// Script-side callback id.
    Callback,
    /// Script-side (resolve, reject) callback id pair.
    Promise,
}

impl ParamType {
    /// Nullable wrapper constructor.
    pub fn optional(inner: ParamType) -> ParamType {
        ParamType::Optional(Box::new(inner))
    }

    pub(crate) fn is_completion(&self) -> bool {
        matches!(self, ParamType::Callback | ParamType::Promise)
    }

    /// Wire slots this parameter consumes: promises carry two callback ids.
    pub(crate) fn wire_slots(&self) -> usize {
        match self {
            ParamType::Promise => 2,
            _ => 1,
        }
    }
}

/// Declared return shape of a candidate method.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReturnShape {
    /// No return value.
    Void,
    /// Returns a wire value directly (requires the sync marker).
    Value,
    /// A bare future/task with no completion channel. Unbridgeable.
    Task,
}

/// A named, typed parameter.
#[derive(Clone, Debug)]
pub struct Param {
    /// Script-visible parameter name, used in parse errors.
    pub name: &'static str,
    /// Declared type.
    pub ty: ParamType,
}

/// Shorthand constructor for a [`Param`].
pub fn param(name: &'static str, ty: ParamType) -> Param {
    Param { name, ty }
}

/// Outcome of one native method body: `Some` only for sync methods.
pub type MethodResult = BridgeResult<Option<WireValue>>;

/// The native logic behind a method, called with already-marshaled arguments.
pub type MethodHandler = Arc<dyn Fn(Args) -> MethodResult + Send + Sync>;

/// One method as declared on a native module. Immutable after registry build.
#[derive(Clone)]
pub struct MethodDecl {
    pub(crate) name: String,
    pub(crate) returns: ReturnShape,
    pub(crate) sync: bool,
    pub(crate) params: Vec<Param>,
    pub(crate) handler: MethodHandler,
}

impl MethodDecl {
    /// Script-visible method name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameters, in order.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Override the declared return shape.
    ///
    /// Used to declare shapes the classifier must reject (a value return
    /// without the sync marker, a bare task).
    pub fn with_returns(mut self, returns: ReturnShape) -> Self {
        self.returns = returns;
        self
    }
}

impl std::fmt::Debug for MethodDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDecl")
            .field("name", &self.name)
            .field("returns", &self.returns)
            .field("sync", &self.sync)
            .field("params", &self.params)
            .finish()
    }
}

/// Declare an asynchronous (queued) method: void return, completion through
/// a trailing Callback/Promise parameter if any.
pub fn method<F>(name: &str, params: Vec<Param>, handler: F) -> MethodDecl
where
    F: Fn(Args) -> MethodResult + Send + Sync + 'static,
{
    MethodDecl {
        name: name.to_string(),
        returns: ReturnShape::Void,
        sync: false,
        params,
        handler: Arc::new(handler),
    }
}

/// Declare an explicitly synchronous method that returns a value directly,
/// bypassing the queued-call envelope.
pub fn sync_method<F>(name: &str, params: Vec<Param>, handler: F) -> MethodDecl
where
    F: Fn(Args) -> MethodResult + Send + Sync + 'static,
{
    MethodDecl {
        name: name.to_string(),
        returns: ReturnShape::Value,
        sync: true,
        params,
        handler: Arc::new(handler),
    }
}

/// Classify a declared method, rejecting unbridgeable shapes.
pub fn classify(decl: &MethodDecl) -> BridgeResult<MethodKind> {
    let completions: Vec<usize> = decl
        .params
        .iter()
        .enumerate()
        .filter(|(_, p)| p.ty.is_completion())
        .map(|(i, _)| i)
        .collect();

    if decl
        .params
        .iter()
        .any(|p| matches!(&p.ty, ParamType::Optional(inner) if inner.is_completion()))
    {
        return Err(BridgeError::NotSupported(format!(
            "method '{}' declares an optional Callback/Promise parameter",
            decl.name
        )));
    }

    if decl.sync {
        if !completions.is_empty() {
            return Err(BridgeError::NotSupported(format!(
                "sync method '{}' cannot take Callback/Promise parameters",
                decl.name
            )));
        }
        return Ok(MethodKind::Sync);
    }

    match decl.returns {
        ReturnShape::Task => {
            return Err(BridgeError::NotImplemented(format!(
                "method '{}' returns a bare task with no way to signal completion across the wire",
                decl.name
            )));
        }
        ReturnShape::Value => {
            return Err(BridgeError::NotSupported(format!(
                "method '{}' returns a value but is not marked sync",
                decl.name
            )));
        }
        ReturnShape::Void => {}
    }

    let n = decl.params.len();
    let trailing = completions
        .iter()
        .rev()
        .zip((0..n).rev())
        .take_while(|(declared, tail)| **declared == *tail)
        .count();
    if trailing != completions.len() {
        return Err(BridgeError::NotSupported(format!(
            "method '{}' declares Callback/Promise parameters that are not last",
            decl.name
        )));
    }

    let tail_types: Vec<&ParamType> = decl.params[n - trailing..].iter().map(|p| &p.ty).collect();
    match tail_types.as_slice() {
        [] => Ok(MethodKind::Normal),
        [ParamType::Callback] => Ok(MethodKind::Callback),
        [ParamType::Callback, ParamType::Callback] => Ok(MethodKind::Callback),
        [ParamType::Promise] => Ok(MethodKind::Promise),
        _ => Err(BridgeError::NotSupported(format!(
            "method '{}' declares an unsupported Callback/Promise arrangement",
            decl.name
        ))),
    }
}
