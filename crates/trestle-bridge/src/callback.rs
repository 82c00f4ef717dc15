//! Script-side callbacks and promises.
//!
//! A [`Callback`] is an opaque numeric id owned by the script engine;
//! invoking it hands an argument array back through the transport's
//! callback-resolution entry point. A [`Promise`] is the (resolve, reject)
//! pair of callbacks representing one eventual outcome.

use crate::error::BridgeResult;
use crate::value::WireValue;
use serde_json::{Map, json};
use std::sync::Arc;
use tracing::trace;

/// Default rejection code for uncategorized native failures.
pub const UNSPECIFIED_ERROR_CODE: &str = "EUNSPECIFIED";

/// The transport's callback-resolution entry point.
///
/// Implementations must re-enter the script context; callbacks may be invoked
/// from any worker thread, and the sink is what defers delivery back onto the
/// serialized script/native paths.
pub trait CallbackSink: Send + Sync {
    /// Deliver `args` to the script-side callback identified by `callback_id`.
    fn invoke_callback(&self, callback_id: u64, args: Vec<WireValue>) -> BridgeResult<()>;
}

/// Shared handle to a callback sink.
pub type CallbackSinkRef = Arc<dyn CallbackSink>;

/// A sink that drops every delivery. Useful when no script engine is wired.
#[derive(Debug, Default)]
pub struct NoopCallbackSink;

impl CallbackSink for NoopCallbackSink {
    fn invoke_callback(&self, callback_id: u64, _args: Vec<WireValue>) -> BridgeResult<()> {
        trace!(callback_id, "callback delivery dropped (noop sink)");
        Ok(())
    }
}

/// A one-shot (by convention) handle delivering an argument list back into
/// the script engine.
///
/// A callback built from a missing or null wire id is a usable no-op:
/// invoking it succeeds and delivers nothing. Repeated invocation is not
/// policed here.
#[derive(Clone)]
pub struct Callback {
    id: Option<u64>,
    sink: CallbackSinkRef,
}

impl Callback {
    /// A callback bound to a wire id.
    pub fn new(id: u64, sink: CallbackSinkRef) -> Self {
        Self { id: Some(id), sink }
    }

    /// The no-op callback produced for a missing/null wire id.
    pub fn no_op(sink: CallbackSinkRef) -> Self {
        Self { id: None, sink }
    }

    /// The wire id, when bound.
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// True when invoking this callback delivers nothing.
    pub fn is_no_op(&self) -> bool {
        self.id.is_none()
    }

    /// Deliver `args` to the script side.
    pub fn invoke(&self, args: Vec<WireValue>) -> BridgeResult<()> {
        match self.id {
            Some(id) => self.sink.invoke_callback(id, args),
            None => {
                trace!("no-op callback invoked");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callback").field("id", &self.id).finish()
    }
}

/// A resolve/reject pair of callbacks.
#[derive(Clone, Debug)]
pub struct Promise {
    resolve: Callback,
    reject: Callback,
}

impl Promise {
    /// Pair two callbacks into a promise.
    pub fn new(resolve: Callback, reject: Callback) -> Self {
        Self { resolve, reject }
    }

    /// Deliver `[value]` through the resolve callback.
    pub fn resolve(&self, value: WireValue) -> BridgeResult<()> {
        self.resolve.invoke(vec![value])
    }

    /// Deliver one `{code, message}` object through the reject callback.
    pub fn reject(&self, code: &str, message: &str) -> BridgeResult<()> {
        self.reject.invoke(vec![json!({
            "code": code,
            "message": message,
        })])
    }

    /// Reject with auxiliary data surfaced verbatim under `userInfo`.
    pub fn reject_with(
        &self,
        code: &str,
        message: &str,
        user_info: Map<String, WireValue>,
    ) -> BridgeResult<()> {
        self.reject.invoke(vec![json!({
            "code": code,
            "message": message,
            "userInfo": user_info,
        })])
    }
}
