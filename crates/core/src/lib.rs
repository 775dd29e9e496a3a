//! `evbus-core`: shared building blocks for the event bus.
//!
//! This crate holds the error model, identifiers and configuration. It has no
//! knowledge of handlers or dispatch.

pub mod config;
pub mod error;
pub mod id;

pub use config::BusConfig;
pub use error::{BusError, BusResult};
pub use id::HandlerId;
