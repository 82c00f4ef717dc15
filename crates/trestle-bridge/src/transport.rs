//! Bridge transport: calls into the script engine and the flushed-queue
//! protocol carrying pending native calls back out.
//!
//! Every round-trip into the engine returns a flushed queue. The queue is
//! validated wholesale before anything is delivered: either every encoded
//! call is dispatched to the native sink in order, followed by exactly one
//! batch-completion signal, or nothing is.

use crate::callback::{CallbackSink, CallbackSinkRef, NoopCallbackSink};
use crate::error::{BridgeError, BridgeResult};
use crate::registry::ModuleRegistry;
use crate::value::WireValue;
use std::sync::{Arc, OnceLock};
use tracing::{error, trace, warn};
use trestle_queue::ActionQueue;

/// The script engine, reduced to the three entry points the bridge uses.
///
/// The engine's source provider guarantees the bundle is loaded and
/// executable before the first `call_function`.
pub trait ScriptExecutor: Send + Sync {
    /// Execute a named module method in the engine and return the queue of
    /// native calls it flushed.
    fn call_function(
        &self,
        module: &str,
        method: &str,
        args: &[WireValue],
    ) -> BridgeResult<WireValue>;

    /// Resolve a script-side callback and return the flushed queue.
    fn invoke_callback(&self, callback_id: u64, args: &[WireValue]) -> BridgeResult<WireValue>;

    /// Set a global variable in the engine.
    fn set_global_variable(&self, name: &str, value: &WireValue) -> BridgeResult<()>;
}

/// Receives errors from queued dispatches, which have no caller left to
/// return them to. Supplied by the embedding host, like an action queue's
/// fault handler.
pub type BridgeFaultHandler = Arc<dyn Fn(BridgeError) + Send + Sync>;

/// Receives validated flushed-queue entries and the batch-completion signal.
pub trait BridgeSink: Send + Sync {
    /// One decoded native call.
    fn invoke(&self, module_id: usize, method_id: usize, params: Vec<WireValue>);

    /// The whole batch has been delivered.
    fn on_batch_complete(&self);
}

/// A parsed flushed queue: the decoded calls of one engine round-trip.
///
/// Exists only for the duration of the round-trip; never persisted.
#[derive(Debug, Default)]
pub struct FlushedQueue {
    calls: Vec<(usize, usize, Vec<WireValue>)>,
}

// Every malformed shape raises the same invalid-operation error; the shape
// detail goes to logging only.
fn invalid_response() -> BridgeError {
    BridgeError::invalid_operation("unexpected shape of flushed queue response")
}

impl FlushedQueue {
    /// Validate and decode a response.
    ///
    /// Accepts an array of at least three elements: `moduleIds`,
    /// `methodIds`, `paramsPerCall`, all arrays of identical length with
    /// non-negative integer ids and array params; a 4th element is accepted
    /// and ignored. Anything else is rejected wholesale.
    pub fn parse(response: &WireValue) -> BridgeResult<FlushedQueue> {
        let top = response.as_array().ok_or_else(|| {
            warn!(kind = crate::value::wire_kind(response), "non-array flushed queue");
            invalid_response()
        })?;
        if top.len() < 3 {
            warn!(len = top.len(), "flushed queue has fewer than 3 elements");
            return Err(invalid_response());
        }

        let module_ids = top[0].as_array().ok_or_else(invalid_response)?;
        let method_ids = top[1].as_array().ok_or_else(invalid_response)?;
        let params_per_call = top[2].as_array().ok_or_else(invalid_response)?;

        if module_ids.len() != method_ids.len() || module_ids.len() != params_per_call.len() {
            warn!(
                modules = module_ids.len(),
                methods = method_ids.len(),
                params = params_per_call.len(),
                "flushed queue sequences have mismatched lengths"
            );
            return Err(invalid_response());
        }

        let mut calls = Vec::with_capacity(module_ids.len());
        for i in 0..module_ids.len() {
            let module_id =
                crate::value::index_as_usize(&module_ids[i], "module_id").map_err(|_| invalid_response())?;
            let method_id =
                crate::value::index_as_usize(&method_ids[i], "method_id").map_err(|_| invalid_response())?;
            let params = params_per_call[i]
                .as_array()
                .cloned()
                .ok_or_else(invalid_response)?;
            calls.push((module_id, method_id, params));
        }

        Ok(FlushedQueue { calls })
    }

    /// Number of encoded calls.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// True when the queue encodes no calls.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// The transport between native code and the script engine.
pub struct Bridge {
    executor: Arc<dyn ScriptExecutor>,
    sink: Arc<dyn BridgeSink>,
    native_queue: Arc<ActionQueue>,
}

impl Bridge {
    /// Wire the transport to its executor, result sink, and native queue.
    pub fn new(
        executor: Arc<dyn ScriptExecutor>,
        sink: Arc<dyn BridgeSink>,
        native_queue: Arc<ActionQueue>,
    ) -> Self {
        Self {
            executor,
            sink,
            native_queue,
        }
    }

    /// Call a named script function and process whatever the engine flushed.
    pub fn call_function(&self, module: &str, method: &str, args: &[WireValue]) -> BridgeResult<()> {
        trace!(module, method, "bridge call");
        let response = self.executor.call_function(module, method, args)?;
        self.process_response(response)
    }

    /// Resolve a script-side callback and process the flushed queue.
    pub fn invoke_callback(&self, callback_id: u64, args: &[WireValue]) -> BridgeResult<()> {
        trace!(callback_id, "bridge callback resolution");
        let response = self.executor.invoke_callback(callback_id, args)?;
        self.process_response(response)
    }

    /// Set a global variable in the engine. The name is required.
    pub fn set_global_variable(&self, name: &str, value: &WireValue) -> BridgeResult<()> {
        if name.is_empty() {
            return Err(BridgeError::ArgumentNull("name"));
        }
        self.executor.set_global_variable(name, value)
    }

    // Validate first, deliver second: a malformed queue delivers nothing.
    // A null response means no pending calls and produces no batch signal.
    fn process_response(&self, response: WireValue) -> BridgeResult<()> {
        if response.is_null() {
            return Ok(());
        }

        let queue = FlushedQueue::parse(&response)?;
        trace!(calls = queue.len(), "dispatching flushed queue");
        for (module_id, method_id, params) in queue.calls {
            let sink = self.sink.clone();
            self.native_queue
                .dispatch(move || sink.invoke(module_id, method_id, params));
        }
        let sink = self.sink.clone();
        self.native_queue.dispatch(move || sink.on_batch_complete());
        Ok(())
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("native_queue", &self.native_queue.name())
            .finish()
    }
}

/// [`BridgeSink`] that dispatches decoded calls into a [`ModuleRegistry`]
/// and fans the batch signal out to listener modules.
///
/// The callback sink is bound after the [`Bridge`] exists (the two reference
/// each other); until then callbacks fall back to no-ops.
pub struct RegistryBridgeSink {
    registry: Arc<ModuleRegistry>,
    callback_sink: OnceLock<CallbackSinkRef>,
    fallback: CallbackSinkRef,
    on_error: BridgeFaultHandler,
}

impl RegistryBridgeSink {
    /// Wrap a registry. Failed dispatches are delivered to `on_error`.
    pub fn new(registry: Arc<ModuleRegistry>, on_error: BridgeFaultHandler) -> Self {
        Self {
            registry,
            callback_sink: OnceLock::new(),
            fallback: Arc::new(NoopCallbackSink),
            on_error,
        }
    }

    /// Bind the callback-resolution path. Binding twice is an error.
    pub fn bind_callback_sink(&self, sink: CallbackSinkRef) -> BridgeResult<()> {
        self.callback_sink.set(sink).map_err(|_| {
            BridgeError::invalid_operation("callback sink already bound for registry bridge sink")
        })
    }

    fn callback_sink(&self) -> &CallbackSinkRef {
        self.callback_sink.get().unwrap_or(&self.fallback)
    }
}

impl BridgeSink for RegistryBridgeSink {
    fn invoke(&self, module_id: usize, method_id: usize, params: Vec<WireValue>) {
        if let Err(err) = self
            .registry
            .invoke(self.callback_sink(), module_id, method_id, &params)
        {
            error!(module_id, method_id, error = %err, "native call failed");
            (self.on_error)(err);
        }
    }

    fn on_batch_complete(&self) {
        self.registry.on_batch_complete();
    }
}

/// [`CallbackSink`] that re-enters [`Bridge::invoke_callback`] on the script
/// context, so worker-thread completions still obey the ordering contract.
pub struct BridgeCallbackSink {
    bridge: Arc<Bridge>,
    script_queue: Arc<ActionQueue>,
    on_error: BridgeFaultHandler,
}

impl BridgeCallbackSink {
    /// Defer callback resolutions onto `script_queue`. A resolution that
    /// fails after deferral is delivered to `on_error`.
    pub fn new(
        bridge: Arc<Bridge>,
        script_queue: Arc<ActionQueue>,
        on_error: BridgeFaultHandler,
    ) -> Self {
        Self {
            bridge,
            script_queue,
            on_error,
        }
    }
}

impl CallbackSink for BridgeCallbackSink {
    fn invoke_callback(&self, callback_id: u64, args: Vec<WireValue>) -> BridgeResult<()> {
        let bridge = self.bridge.clone();
        let on_error = self.on_error.clone();
        self.script_queue.dispatch(move || {
            if let Err(err) = bridge.invoke_callback(callback_id, &args) {
                warn!(callback_id, error = %err, "callback resolution failed");
                on_error(err);
            }
        });
        Ok(())
    }
}
