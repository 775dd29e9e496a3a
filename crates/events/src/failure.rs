//! Failure containment for background handlers.
//!
//! A background handler has no observer: nobody joins its thread and the
//! dispatcher has already moved on. Whatever goes wrong there (an error, a
//! panic, or a thread that could not be started) is turned into a
//! [`BackgroundFailure`] and handed to the bus's [`FailureSink`].

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use evbus_core::HandlerId;

use crate::Handler;

/// Why a background handler did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    /// The handler returned an error.
    Error(String),
    /// The handler panicked.
    Panic(String),
    /// The background thread could not be spawned; the handler never ran.
    Spawn(String),
}

impl core::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Error(msg) => write!(f, "handler returned an error: {msg}"),
            Self::Panic(msg) => write!(f, "handler panicked: {msg}"),
            Self::Spawn(msg) => write!(f, "failed to spawn background thread: {msg}"),
        }
    }
}

/// A contained background handler failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackgroundFailure {
    pub event: String,
    pub handler: String,
    pub handler_id: HandlerId,
    pub reason: FailureReason,
    pub occurred_at: DateTime<Utc>,
}

impl BackgroundFailure {
    pub fn new<A>(event: impl Into<String>, handler: &Handler<A>, reason: FailureReason) -> Self {
        Self {
            event: event.into(),
            handler: handler.name().to_string(),
            handler_id: handler.id(),
            reason,
            occurred_at: Utc::now(),
        }
    }
}

/// Receiver of background handler failures.
///
/// `report` is called from the failing handler's own thread (or from the
/// dispatching thread when spawning failed), so implementations must not
/// assume any particular thread.
pub trait FailureSink: Send + Sync {
    fn report(&self, failure: BackgroundFailure);
}

impl<F> FailureSink for F
where
    F: Fn(BackgroundFailure) + Send + Sync,
{
    fn report(&self, failure: BackgroundFailure) {
        self(failure)
    }
}

/// Default sink: logs each failure and drops it.
#[derive(Debug, Copy, Clone, Default)]
pub struct LogFailureSink;

impl FailureSink for LogFailureSink {
    fn report(&self, failure: BackgroundFailure) {
        warn!(
            event = %failure.event,
            handler = %failure.handler,
            handler_id = %failure.handler_id,
            reason = %failure.reason,
            "background handler failed"
        );
    }
}

/// Sink that keeps every failure in memory (tests/dev).
#[derive(Debug, Default)]
pub struct CollectingFailureSink {
    failures: Mutex<Vec<BackgroundFailure>>,
    reported: Condvar,
}

impl CollectingFailureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the failures reported so far.
    pub fn failures(&self) -> Vec<BackgroundFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until at least `count` failures were reported or `timeout` elapsed.
    ///
    /// Returns the failures collected at that point.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<BackgroundFailure> {
        let deadline = Instant::now() + timeout;
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        while failures.len() < count {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .reported
                .wait_timeout(failures, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            failures = guard;
        }
        failures.clone()
    }
}

impl FailureSink for CollectingFailureSink {
    fn report(&self, failure: BackgroundFailure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
        self.reported.notify_all();
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
