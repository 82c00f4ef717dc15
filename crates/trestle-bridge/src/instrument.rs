//! Named-scope instrumentation seam.
//!
//! The registry brackets every dispatch in a begin/end scope. The sink has no
//! effect on correctness; the default implementation emits `tracing` events.

use std::sync::Arc;
use tracing::trace;

/// Begin/end named scopes around bridge work.
pub trait Instrumentation: Send + Sync {
    /// A named scope opened.
    fn begin_scope(&self, name: &str);

    /// The matching scope closed.
    fn end_scope(&self, name: &str);
}

/// Default sink backed by `tracing` trace events.
#[derive(Debug, Default)]
pub struct TracingInstrumentation;

impl Instrumentation for TracingInstrumentation {
    fn begin_scope(&self, name: &str) {
        trace!(scope = name, "scope begin");
    }

    fn end_scope(&self, name: &str) {
        trace!(scope = name, "scope end");
    }
}

/// RAII guard pairing `begin_scope` with `end_scope`.
pub struct ScopeGuard<'a> {
    sink: &'a dyn Instrumentation,
    name: &'a str,
}

impl<'a> ScopeGuard<'a> {
    /// Open a scope; it closes when the guard drops.
    pub fn enter(sink: &'a dyn Instrumentation, name: &'a str) -> Self {
        sink.begin_scope(name);
        Self { sink, name }
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.sink.end_scope(self.name);
    }
}

/// Shared handle to an instrumentation sink.
pub type InstrumentationRef = Arc<dyn Instrumentation>;
