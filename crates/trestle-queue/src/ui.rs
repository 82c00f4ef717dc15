//! UI-affine execution context capability.
//!
//! Module lifecycle notifications and UI-owned module state are pinned to the
//! embedder's UI context. The capability is passed in explicitly wherever it
//! is needed; there is deliberately no process-wide "current UI thread"
//! static to assert against.

use crate::queue::ActionQueue;
use std::sync::Arc;

/// The narrow UI-context surface the bridge consumes: run a closure on the
/// UI context, and ask whether the caller is already there.
pub trait UiContext: Send + Sync {
    /// Run `action` on the UI context.
    fn run(&self, action: Box<dyn FnOnce() + Send>);

    /// True when the calling thread is the UI context.
    fn is_on_context(&self) -> bool;
}

/// [`UiContext`] pinned to an [`ActionQueue`] thread.
///
/// Headless embeddings and tests use this in place of a real UI dispatcher.
pub struct QueueUiContext {
    queue: Arc<ActionQueue>,
}

impl QueueUiContext {
    /// Wrap an action queue as the UI context.
    pub fn new(queue: Arc<ActionQueue>) -> Self {
        Self { queue }
    }

    /// The backing queue.
    pub fn queue(&self) -> &Arc<ActionQueue> {
        &self.queue
    }
}

impl UiContext for QueueUiContext {
    fn run(&self, action: Box<dyn FnOnce() + Send>) {
        self.queue.dispatch(action);
    }

    fn is_on_context(&self) -> bool {
        self.queue.is_on_queue()
    }
}
