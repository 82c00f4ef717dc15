//! Reverse registry: native-callable stubs for script-side modules.
//!
//! A stub executes nothing itself. Each generated method forwards
//! `(module, method, args)` to a single invocation handler bound once per
//! stub; the handler knows how to reach the transport. Method names come
//! from the type's registration-time descriptor, never from caller-identity
//! capture.

use crate::error::{BridgeError, BridgeResult};
use crate::value::WireValue;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Registration-time description of a script module: its script-visible
/// name and the exact set of forwardable method names.
#[derive(Clone, Copy, Debug)]
pub struct ScriptModuleDescriptor {
    /// Script-visible module name.
    pub name: &'static str,
    /// Forwardable method names.
    pub methods: &'static [&'static str],
}

/// Receives forwarded stub invocations and carries them to the transport.
pub trait InvocationHandler: Send + Sync {
    /// One forwarded call; the argument set arrives intact as one unit.
    fn invoke(&self, module: &str, method: &str, args: Vec<WireValue>) -> BridgeResult<()>;
}

/// A type whose values are stubs for one script-side module.
pub trait ScriptModule: Send + Sync + 'static {
    /// The module's descriptor.
    fn descriptor() -> ScriptModuleDescriptor
    where
        Self: Sized;

    /// Wrap a built stub. The type adds nothing but typed method wrappers
    /// around [`ScriptStub::invoke`].
    fn from_stub(stub: ScriptStub) -> Self
    where
        Self: Sized;
}

/// The forwarding core every script-module type wraps.
pub struct ScriptStub {
    descriptor: ScriptModuleDescriptor,
    handler: OnceLock<Arc<dyn InvocationHandler>>,
}

impl ScriptStub {
    /// Build an unbound stub. The registry does this for registered types;
    /// standalone stubs are mainly useful in tests.
    pub fn new(descriptor: ScriptModuleDescriptor) -> Self {
        Self {
            descriptor,
            handler: OnceLock::new(),
        }
    }

    /// The stub's module name.
    pub fn module_name(&self) -> &'static str {
        self.descriptor.name
    }

    /// Bind the forwarding target. Binding a second time is an error.
    pub fn bind(&self, handler: Arc<dyn InvocationHandler>) -> BridgeResult<()> {
        self.handler.set(handler).map_err(|_| {
            BridgeError::invalid_operation(format!(
                "invocation handler already bound for script module '{}'",
                self.descriptor.name
            ))
        })
    }

    /// Forward one call to the bound handler.
    ///
    /// Safe to call from many threads at once; each call's argument set
    /// stays intact end to end.
    pub fn invoke(&self, method: &str, args: Vec<WireValue>) -> BridgeResult<()> {
        if !self.descriptor.methods.contains(&method) {
            return Err(BridgeError::invalid_argument(
                "method",
                format!(
                    "script module '{}' declares no method '{}'",
                    self.descriptor.name, method
                ),
            ));
        }
        let handler = self.handler.get().ok_or_else(|| {
            BridgeError::invalid_operation(format!(
                "no invocation handler bound for script module '{}'",
                self.descriptor.name
            ))
        })?;
        handler.invoke(self.descriptor.name, method, args)
    }
}

impl std::fmt::Debug for ScriptStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptStub")
            .field("module", &self.descriptor.name)
            .field("bound", &self.handler.get().is_some())
            .finish()
    }
}

type StubConstructor =
    Box<dyn Fn(Arc<dyn InvocationHandler>) -> BridgeResult<Arc<dyn Any + Send + Sync>> + Send + Sync>;

struct Entry {
    name: &'static str,
    construct: StubConstructor,
    instance: parking_lot::Mutex<Option<Arc<dyn Any + Send + Sync>>>,
}

/// Registry of script-module stub types.
pub struct ScriptModuleRegistry {
    entries: HashMap<TypeId, Entry>,
    order: Vec<TypeId>,
}

impl ScriptModuleRegistry {
    /// Start a builder.
    pub fn builder() -> ScriptModuleRegistryBuilder {
        ScriptModuleRegistryBuilder {
            entries: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Get the stub instance for `T`, constructing and binding it to
    /// `handler` on first request. Requesting an unregistered type is an
    /// error.
    pub fn get_module<T: ScriptModule>(
        &self,
        handler: Arc<dyn InvocationHandler>,
    ) -> BridgeResult<Arc<T>> {
        let entry = self.entries.get(&TypeId::of::<T>()).ok_or_else(|| {
            BridgeError::invalid_operation(format!(
                "script module type '{}' is not registered",
                type_name::<T>()
            ))
        })?;

        let mut slot = entry.instance.lock();
        if slot.is_none() {
            debug!(module = entry.name, "instantiating script module stub");
            *slot = Some((entry.construct)(handler)?);
        }
        slot.as_ref()
            .and_then(|instance| instance.clone().downcast::<T>().ok())
            .ok_or_else(|| {
                BridgeError::invalid_operation(format!(
                    "script module type '{}' resolved to a foreign instance",
                    type_name::<T>()
                ))
            })
    }

    /// Registered module names, in registration order.
    pub fn module_names(&self) -> Vec<&'static str> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| e.name))
            .collect()
    }
}

/// Builder for [`ScriptModuleRegistry`].
pub struct ScriptModuleRegistryBuilder {
    entries: HashMap<TypeId, Entry>,
    order: Vec<TypeId>,
}

impl std::fmt::Debug for ScriptModuleRegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptModuleRegistryBuilder")
            .field(
                "modules",
                &self
                    .order
                    .iter()
                    .filter_map(|id| self.entries.get(id).map(|e| e.name))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl ScriptModuleRegistryBuilder {
    /// Register a stub type.
    ///
    /// The descriptor must name the module and declare at least one
    /// forwarding method; registering the same type twice is rejected.
    pub fn add<T: ScriptModule>(mut self) -> BridgeResult<Self> {
        let descriptor = T::descriptor();
        if descriptor.name.is_empty() {
            return Err(BridgeError::invalid_argument(
                "type",
                format!("script module type '{}' has an empty name", type_name::<T>()),
            ));
        }
        if descriptor.methods.is_empty() {
            return Err(BridgeError::invalid_argument(
                "type",
                format!(
                    "script module type '{}' declares no forwarding methods",
                    type_name::<T>()
                ),
            ));
        }

        let type_id = TypeId::of::<T>();
        if self.entries.contains_key(&type_id) {
            return Err(BridgeError::invalid_argument(
                "type",
                format!("script module type '{}' is already registered", type_name::<T>()),
            ));
        }

        self.order.push(type_id);
        self.entries.insert(
            type_id,
            Entry {
                name: descriptor.name,
                construct: Box::new(move |handler| {
                    let stub = ScriptStub::new(descriptor);
                    stub.bind(handler)?;
                    Ok(Arc::new(T::from_stub(stub)) as Arc<dyn Any + Send + Sync>)
                }),
                instance: parking_lot::Mutex::new(None),
            },
        );
        Ok(self)
    }

    /// Freeze the registration set.
    pub fn build(self) -> ScriptModuleRegistry {
        ScriptModuleRegistry {
            entries: self.entries,
            order: self.order,
        }
    }
}
