//! Sequential action queue backed by a dedicated worker thread.
//!
//! Every action dispatched to an [`ActionQueue`] runs on the same thread, in
//! FIFO order, one at a time. A panic inside one action is caught, converted
//! to a [`QueueError`] and handed to the queue's fault handler; the queue
//! keeps processing subsequent actions.

use crossbeam_channel::{Sender, bounded, unbounded};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors surfaced by an action queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// A queued action panicked. The queue itself survives.
    #[error("action on queue '{queue}' failed: {message}")]
    ActionFailed {
        /// Name of the queue the action ran on.
        queue: String,
        /// Panic payload, stringified.
        message: String,
    },

    /// The queue has shut down and can no longer accept work.
    #[error("action queue '{0}' is disconnected")]
    Disconnected(String),
}

/// Result type alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Receives faults from actions that panicked on the queue.
///
/// Delivery through this handler is what isolates a faulted action from the
/// rest of the queue: the worker thread never unwinds past one action.
pub type FaultHandler = Arc<dyn Fn(QueueError) + Send + Sync>;

enum Message {
    Run(Box<dyn FnOnce() + Send>),
    Shutdown,
}

/// A strictly sequential, FIFO execution context.
///
/// One worker thread drains the mailbox; two actions on the same queue never
/// run concurrently, and dispatch order is execution order.
pub struct ActionQueue {
    name: String,
    tx: Sender<Message>,
    thread_id: ThreadId,
    handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
    on_error: FaultHandler,
}

impl ActionQueue {
    /// Create a queue named `"action-queue"` with the given fault handler.
    pub fn new(on_error: FaultHandler) -> Self {
        Self::with_name("action-queue", on_error)
    }

    /// Create a named queue. The name shows up in thread names and faults.
    pub fn with_name(name: &str, on_error: FaultHandler) -> Self {
        let (tx, rx) = unbounded::<Message>();
        let queue_name = name.to_string();
        let worker_name = queue_name.clone();
        let worker_on_error = on_error.clone();

        let handle = std::thread::Builder::new()
            .name(worker_name.clone())
            .spawn(move || {
                debug!(queue = %worker_name, "action queue started");
                for message in rx.iter() {
                    match message {
                        Message::Run(action) => {
                            if let Err(payload) = catch_unwind(AssertUnwindSafe(action)) {
                                worker_on_error(QueueError::ActionFailed {
                                    queue: worker_name.clone(),
                                    message: panic_message(payload.as_ref()),
                                });
                            }
                        }
                        Message::Shutdown => break,
                    }
                }
                debug!(queue = %worker_name, "action queue stopped");
            })
            .unwrap_or_else(|e| panic!("failed to spawn queue thread '{name}': {e}"));

        let thread_id = handle.thread().id();
        Self {
            name: queue_name,
            tx,
            thread_id,
            handle: parking_lot::Mutex::new(Some(handle)),
            on_error,
        }
    }

    /// The queue's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the calling thread is this queue's worker thread.
    pub fn is_on_queue(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Enqueue an action. Never runs inline, even from the queue thread.
    ///
    /// If the queue has shut down the action is dropped and the fault
    /// handler receives [`QueueError::Disconnected`].
    pub fn dispatch<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Message::Run(Box::new(action))).is_err() {
            warn!(queue = %self.name, "dispatch on disconnected queue");
            (self.on_error)(QueueError::Disconnected(self.name.clone()));
        }
    }

    /// Enqueue an action and block until it finishes, returning its result.
    ///
    /// Runs inline when already on the queue thread, since blocking there
    /// would deadlock.
    pub fn run<T, F>(&self, action: F) -> QueueResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_on_queue() {
            return Ok(action());
        }

        let (done_tx, done_rx) = bounded::<T>(1);
        let sent = self.tx.send(Message::Run(Box::new(move || {
            let _ = done_tx.send(action());
        })));
        if sent.is_err() {
            return Err(QueueError::Disconnected(self.name.clone()));
        }

        // recv fails only if the action panicked before sending; the panic
        // itself was already delivered to the fault handler.
        done_rx.recv().map_err(|_| QueueError::ActionFailed {
            queue: self.name.clone(),
            message: "action did not complete".to_string(),
        })
    }
}

impl Drop for ActionQueue {
    fn drop(&mut self) {
        // Already-queued actions drain before the shutdown marker is seen.
        let _ = self.tx.send(Message::Shutdown);
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for ActionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionQueue")
            .field("name", &self.name)
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
