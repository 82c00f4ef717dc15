//! Native module declarations.
//!
//! A module is a named bundle of methods, constants, and optional lifecycle
//! hooks, built with a fluent builder and consumed by the registry.

use crate::method::MethodDecl;
use crate::value::WireValue;
use serde_json::Map;
use std::sync::Arc;

/// A lifecycle hook: initialize, dispose, or batch-complete notification.
pub type ModuleHook = Arc<dyn Fn() + Send + Sync>;

/// A native module as supplied to the registry builder.
pub struct NativeModule {
    name: String,
    constants: Map<String, WireValue>,
    can_override: bool,
    methods: Vec<MethodDecl>,
    initialize: Option<ModuleHook>,
    on_dispose: Option<ModuleHook>,
    on_batch_complete: Option<ModuleHook>,
}

impl NativeModule {
    /// Start a module with the given script-visible name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            constants: Map::new(),
            can_override: false,
            methods: Vec::new(),
            initialize: None,
            on_dispose: None,
            on_batch_complete: None,
        }
    }

    /// Replace the constants map published to the script side.
    pub fn with_constants(mut self, constants: Map<String, WireValue>) -> Self {
        self.constants = constants;
        self
    }

    /// Add one constant.
    pub fn with_constant(mut self, key: &str, value: WireValue) -> Self {
        self.constants.insert(key.to_string(), value);
        self
    }

    /// Declare a method. Declaration order is the wire method id.
    pub fn with_method(mut self, decl: MethodDecl) -> Self {
        self.methods.push(decl);
        self
    }

    /// Allow this module to replace an already-registered module of the same
    /// name.
    pub fn with_can_override(mut self, can_override: bool) -> Self {
        self.can_override = can_override;
        self
    }

    /// Hook run once when the owning instance initializes.
    pub fn with_initialize<F: Fn() + Send + Sync + 'static>(mut self, hook: F) -> Self {
        self.initialize = Some(Arc::new(hook));
        self
    }

    /// Hook run once when the owning instance is disposed.
    pub fn with_on_dispose<F: Fn() + Send + Sync + 'static>(mut self, hook: F) -> Self {
        self.on_dispose = Some(Arc::new(hook));
        self
    }

    /// Hook run after each flushed queue finishes processing.
    pub fn with_on_batch_complete<F: Fn() + Send + Sync + 'static>(mut self, hook: F) -> Self {
        self.on_batch_complete = Some(Arc::new(hook));
        self
    }

    /// The module's script-visible name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Constants published in the module manifest.
    pub fn constants(&self) -> &Map<String, WireValue> {
        &self.constants
    }

    /// Whether this module may replace a same-named registration.
    pub fn can_override(&self) -> bool {
        self.can_override
    }

    /// Declared methods, in wire id order.
    pub fn methods(&self) -> &[MethodDecl] {
        &self.methods
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        String,
        Map<String, WireValue>,
        Vec<MethodDecl>,
        Option<ModuleHook>,
        Option<ModuleHook>,
        Option<ModuleHook>,
    ) {
        (
            self.name,
            self.constants,
            self.methods,
            self.initialize,
            self.on_dispose,
            self.on_batch_complete,
        )
    }
}

impl std::fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeModule")
            .field("name", &self.name)
            .field("methods", &self.methods.len())
            .field("can_override", &self.can_override)
            .finish()
    }
}
