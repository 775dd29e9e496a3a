//! Tracing subscriber initialization.
//!
//! The bus logs registration and dispatch at `debug`, duplicate registrations
//! at `trace` and contained background failures at `warn`. Use
//! `RUST_LOG=evbus_events=debug` to follow dispatch.

use tracing_subscriber::EnvFilter;

/// Initialize tracing for the process, falling back to `default_directive`
/// when `RUST_LOG` is unset or invalid.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let directives = filter.to_string();

    // JSON logs + timestamps; thread names identify background handlers.
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_thread_names(true)
        .with_target(false)
        .try_init()
        .is_ok();

    if installed {
        ::tracing::debug!(filter = %directives, "tracing initialized");
    }
    installed
}
