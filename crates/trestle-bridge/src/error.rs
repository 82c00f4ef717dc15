//! Error types for trestle-bridge.

use thiserror::Error;
use trestle_queue::QueueError;

/// Errors raised by registration, marshaling, dispatch, and transport.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A required input was missing.
    #[error("argument '{0}' must not be null")]
    ArgumentNull(&'static str),

    /// An input had a bad id or shape (module id out of range, malformed
    /// descriptor, undeclared stub method).
    #[error("invalid argument '{param}': {message}")]
    ArgumentInvalid {
        /// Name of the offending parameter.
        param: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// A method shape the bridge cannot carry: overloads, a non-void return
    /// without a sync marker, a bad Callback/Promise arrangement.
    #[error("method shape is not supported by the bridge: {0}")]
    NotSupported(String),

    /// A declared but unreachable capability, e.g. a bare task-returning
    /// method with no Callback/Promise to signal completion through.
    #[error("not implemented for this bridge: {0}")]
    NotImplemented(String),

    /// Arity or type-conversion failure on supplied arguments. `param` is
    /// `"args"` for arity failures, otherwise the failing parameter's name.
    #[error("failed to parse arguments for '{module}.{method}' ({param}): {message}")]
    ArgumentParse {
        /// Module whose method was addressed.
        module: String,
        /// Method name.
        method: String,
        /// The failing parameter, or `"args"` for the whole container.
        param: String,
        /// Failure detail.
        message: String,
    },

    /// Unknown module/method lookup, malformed response envelope, or
    /// double-binding an invocation handler.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The script engine reported a failure while executing a call.
    #[error("script execution failed: {0}")]
    Script(String),

    /// A pinned execution context failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Wire value serialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// Shorthand for [`BridgeError::ArgumentInvalid`].
    pub fn invalid_argument(param: &'static str, message: impl Into<String>) -> Self {
        Self::ArgumentInvalid {
            param,
            message: message.into(),
        }
    }

    /// Shorthand for [`BridgeError::InvalidOperation`].
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// The parameter this error names, when it names one.
    pub fn param_name(&self) -> Option<&str> {
        match self {
            Self::ArgumentNull(param) => Some(param),
            Self::ArgumentInvalid { param, .. } => Some(param),
            Self::ArgumentParse { param, .. } => Some(param),
            _ => None,
        }
    }
}

/// Result type alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
