//! Module/method registry: wire addressing and dispatch.
//!
//! The builder freezes modules in insertion order; module and method ids are
//! the 0-based declaration-order indices and never change for the life of a
//! built registry. Every invoker is created at build time, so unbridgeable
//! method shapes fail registration, never a call.

use crate::callback::CallbackSinkRef;
use crate::error::{BridgeError, BridgeResult};
use crate::instrument::{InstrumentationRef, ScopeGuard, TracingInstrumentation};
use crate::marshal::{CompiledInvokerFactory, InvokerFactory, MethodInvoker};
use crate::method::MethodKind;
use crate::module::{ModuleHook, NativeModule};
use crate::value::WireValue;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use trestle_queue::UiContext;

struct MethodRegistration {
    name: String,
    tracing_name: String,
    kind: MethodKind,
    invoker: Arc<dyn MethodInvoker>,
}

struct ModuleDefinition {
    name: String,
    constants: Map<String, WireValue>,
    methods: Vec<MethodRegistration>,
    initialize: Option<ModuleHook>,
    on_dispose: Option<ModuleHook>,
    on_batch_complete: Option<ModuleHook>,
}

/// The set of native modules exposed to one script instance.
pub struct ModuleRegistry {
    table: Vec<ModuleDefinition>,
    batch_listeners: Vec<usize>,
    ui: Arc<dyn UiContext>,
    instrumentation: InstrumentationRef,
}

impl ModuleRegistry {
    /// Start a builder bound to the given UI-context capability.
    pub fn builder(ui: Arc<dyn UiContext>) -> ModuleRegistryBuilder {
        ModuleRegistryBuilder {
            ui,
            modules: Vec::new(),
            index_by_name: HashMap::new(),
            instrumentation: Arc::new(TracingInstrumentation),
        }
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// True when no modules are registered.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Module names in wire id order.
    pub fn module_names(&self) -> Vec<&str> {
        self.table.iter().map(|def| def.name.as_str()).collect()
    }

    fn addressed(
        &self,
        module_id: usize,
        method_id: usize,
    ) -> BridgeResult<(&ModuleDefinition, &MethodRegistration)> {
        let def = self.table.get(module_id).ok_or_else(|| {
            BridgeError::invalid_argument("module_id", format!("call to unknown module: {module_id}"))
        })?;
        let method = def.methods.get(method_id).ok_or_else(|| {
            BridgeError::invalid_argument(
                "method_id",
                format!("call to unknown method {method_id} on module '{}'", def.name),
            )
        })?;
        Ok((def, method))
    }

    /// Dispatch one queued call to the addressed method.
    ///
    /// Bounds failures touch no module state. Sync methods are rejected
    /// here; they bypass the queued-call envelope via [`Self::invoke_sync`].
    pub fn invoke(
        &self,
        sink: &CallbackSinkRef,
        module_id: usize,
        method_id: usize,
        args: &[WireValue],
    ) -> BridgeResult<()> {
        let (def, method) = self.addressed(module_id, method_id)?;
        if method.kind == MethodKind::Sync {
            return Err(BridgeError::invalid_operation(format!(
                "sync method '{}.{}' must be invoked via invoke_sync",
                def.name, method.name
            )));
        }
        let _scope = ScopeGuard::enter(self.instrumentation.as_ref(), &method.tracing_name);
        method.invoker.invoke(sink, args)?;
        Ok(())
    }

    /// Invoke a sync method and return its value directly.
    pub fn invoke_sync(
        &self,
        sink: &CallbackSinkRef,
        module_id: usize,
        method_id: usize,
        args: &[WireValue],
    ) -> BridgeResult<WireValue> {
        let (def, method) = self.addressed(module_id, method_id)?;
        if method.kind != MethodKind::Sync {
            return Err(BridgeError::invalid_operation(format!(
                "method '{}.{}' is not sync",
                def.name, method.name
            )));
        }
        let _scope = ScopeGuard::enter(self.instrumentation.as_ref(), &method.tracing_name);
        Ok(method
            .invoker
            .invoke(sink, args)?
            .unwrap_or(WireValue::Null))
    }

    /// Notify every module, in registration order, that the instance is up.
    ///
    /// Must run on the UI context.
    pub fn notify_initialize(&self) {
        debug_assert!(
            self.ui.is_on_context(),
            "notify_initialize must run on the UI context"
        );
        let _scope = ScopeGuard::enter(self.instrumentation.as_ref(), "ModuleRegistry_NotifyInitialize");
        for def in &self.table {
            if let Some(hook) = &def.initialize {
                hook();
            }
        }
    }

    /// Notify every module, in registration order, that the instance is
    /// being torn down. Must run on the UI context.
    pub fn notify_dispose(&self) {
        debug_assert!(
            self.ui.is_on_context(),
            "notify_dispose must run on the UI context"
        );
        let _scope = ScopeGuard::enter(self.instrumentation.as_ref(), "ModuleRegistry_NotifyDispose");
        for def in &self.table {
            if let Some(hook) = &def.on_dispose {
                hook();
            }
        }
    }

    /// Signal batch completion to every listener module, in collection order.
    pub fn on_batch_complete(&self) {
        for index in &self.batch_listeners {
            if let Some(hook) = &self.table[*index].on_batch_complete {
                hook();
            }
        }
    }

    /// The manifest published to the script side: per module, in registry
    /// order, `[name, constants, methodNames[], promiseMethodIndices?,
    /// syncMethodIndices?]`.
    pub fn describe_for_script(&self) -> WireValue {
        let _scope = ScopeGuard::enter(self.instrumentation.as_ref(), "CreateModuleManifest");
        let mut manifest = Vec::with_capacity(self.table.len());
        for def in &self.table {
            let mut entry = vec![json!(def.name), Value::Object(def.constants.clone())];
            if !def.methods.is_empty() {
                let mut names = Vec::with_capacity(def.methods.len());
                let mut promise_ids = Vec::new();
                let mut sync_ids = Vec::new();
                for (id, method) in def.methods.iter().enumerate() {
                    names.push(json!(method.name));
                    match method.kind {
                        MethodKind::Promise => promise_ids.push(id),
                        MethodKind::Sync => sync_ids.push(id),
                        _ => {}
                    }
                }
                entry.push(Value::Array(names));
                if !promise_ids.is_empty() || !sync_ids.is_empty() {
                    entry.push(json!(promise_ids));
                    if !sync_ids.is_empty() {
                        entry.push(json!(sync_ids));
                    }
                }
            }
            manifest.push(Value::Array(entry));
        }
        Value::Array(manifest)
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.module_names())
            .finish()
    }
}

impl std::fmt::Debug for ModuleRegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistryBuilder")
            .field(
                "modules",
                &self.modules.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Builder for [`ModuleRegistry`].
pub struct ModuleRegistryBuilder {
    ui: Arc<dyn UiContext>,
    modules: Vec<NativeModule>,
    index_by_name: HashMap<String, usize>,
    instrumentation: InstrumentationRef,
}

impl ModuleRegistryBuilder {
    /// Add a native module.
    ///
    /// An empty name is rejected. A name collision replaces the earlier
    /// registration in place only when the new module opts in via
    /// `can_override`; the replacement keeps the original's position, so id
    /// assignment stays insertion-stable.
    pub fn add(mut self, module: NativeModule) -> BridgeResult<Self> {
        if module.name().is_empty() {
            return Err(BridgeError::invalid_argument(
                "module",
                "native module cannot have an empty name",
            ));
        }

        if let Some(&existing) = self.index_by_name.get(module.name()) {
            if !module.can_override() {
                return Err(BridgeError::invalid_operation(format!(
                    "native module tried to override existing registration for name '{}'; \
                     set can_override if this was intended",
                    module.name()
                )));
            }
            debug!(module = module.name(), "overriding module registration");
            self.modules[existing] = module;
        } else {
            self.index_by_name
                .insert(module.name().to_string(), self.modules.len());
            self.modules.push(module);
        }

        Ok(self)
    }

    /// Replace the instrumentation sink.
    pub fn instrumentation(mut self, sink: InstrumentationRef) -> Self {
        self.instrumentation = sink;
        self
    }

    /// Build with the default (compiled) marshaling strategy.
    pub fn build(self) -> BridgeResult<ModuleRegistry> {
        self.build_with(&CompiledInvokerFactory)
    }

    /// Build with an explicit marshaling strategy.
    ///
    /// Assigns dense 0-based module/method ids in insertion order and
    /// creates every invoker up front; any registration-shape error aborts
    /// construction.
    pub fn build_with(self, factory: &dyn InvokerFactory) -> BridgeResult<ModuleRegistry> {
        let mut table = Vec::with_capacity(self.modules.len());
        let mut batch_listeners = Vec::new();

        for (module_id, module) in self.modules.into_iter().enumerate() {
            let (name, constants, decls, initialize, on_dispose, on_batch_complete) =
                module.into_parts();

            let mut seen = HashMap::new();
            let mut methods = Vec::with_capacity(decls.len());
            for (method_id, decl) in decls.into_iter().enumerate() {
                if seen.insert(decl.name().to_string(), method_id).is_some() {
                    return Err(BridgeError::NotSupported(format!(
                        "module '{}' overloads method name '{}'; wire addressing by name \
                         would be ambiguous",
                        name,
                        decl.name()
                    )));
                }
                let method_name = decl.name().to_string();
                let tracing_name = format!("NativeCall__{}_{}", name, method_name);
                let invoker = factory.create(&name, decl)?;
                methods.push(MethodRegistration {
                    kind: invoker.kind(),
                    name: method_name,
                    tracing_name,
                    invoker,
                });
            }

            if on_batch_complete.is_some() {
                batch_listeners.push(module_id);
            }

            debug!(module = %name, methods = methods.len(), module_id, "module registered");
            table.push(ModuleDefinition {
                name,
                constants,
                methods,
                initialize,
                on_dispose,
                on_batch_complete,
            });
        }

        Ok(ModuleRegistry {
            table,
            batch_listeners,
            ui: self.ui,
            instrumentation: self.instrumentation,
        })
    }
}
