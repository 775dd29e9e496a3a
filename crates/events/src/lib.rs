//! `evbus-events`: in-process event registry and dispatch.
//!
//! Handlers subscribe to named events, either synchronously (run in the
//! dispatching thread) or in the background (one fresh thread per handler per
//! dispatch). See [`EventBus`] for the dispatch contract.

pub mod bus;
pub mod dispatch;
pub mod failure;
pub mod handler;

pub use bus::EventBus;
pub use failure::{
    BackgroundFailure, CollectingFailureSink, FailureReason, FailureSink, LogFailureSink,
};
pub use handler::{DispatchMode, Handler, HandlerError, HandlerResult, HandlerSelector};

pub use evbus_core::{BusConfig, BusError, BusResult, HandlerId};
