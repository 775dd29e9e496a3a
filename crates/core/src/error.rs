//! Registry error model.

use thiserror::Error;

/// Result type used by registry operations that can fail.
pub type BusResult<T> = Result<T, BusError>;

/// Registry-level error.
///
/// Only removal and identifier parsing can fail. Errors raised by handlers are
/// not represented here; they pass through dispatch untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// No handler with the requested name (or id) is subscribed to the event.
    #[error("handler `{handler}` doesn't exist inside event `{event}`")]
    HandlerNotFound { event: String, handler: String },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl BusError {
    pub fn handler_not_found(event: impl Into<String>, handler: impl Into<String>) -> Self {
        Self::HandlerNotFound {
            event: event.into(),
            handler: handler.into(),
        }
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn is_handler_not_found(&self) -> bool {
        matches!(self, Self::HandlerNotFound { .. })
    }
}
