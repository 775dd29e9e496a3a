//! Tracing/logging setup for processes embedding the event bus.

/// Initialize process-wide tracing with JSON output.
///
/// The filter comes from `RUST_LOG`, defaulting to `info`. Safe to call
/// multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init("info");
}

/// Subscriber construction (filters, formatting).
pub mod tracing;
