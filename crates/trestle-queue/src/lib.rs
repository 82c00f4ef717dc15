//! trestle-queue - pinned execution contexts for the trestle bridge.
//!
//! The bridge runs on three contexts: a single-threaded script context, a
//! strictly sequential native-execution queue, and a UI-affine context. This
//! crate provides the queue primitive ([`ActionQueue`]) and the explicit
//! UI-affinity capability ([`UiContext`]) the other two are built from.

pub mod queue;
pub mod ui;

pub use queue::{ActionQueue, FaultHandler, QueueError, QueueResult};
pub use ui::{QueueUiContext, UiContext};
