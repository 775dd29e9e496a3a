//! Event bus configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable overriding [`BusConfig::thread_prefix`].
pub const ENV_THREAD_PREFIX: &str = "EVBUS_THREAD_PREFIX";

/// Environment variable overriding [`BusConfig::thread_stack_size`] (bytes).
pub const ENV_THREAD_STACK_SIZE: &str = "EVBUS_THREAD_STACK_SIZE";

const DEFAULT_THREAD_PREFIX: &str = "evbus";

/// Settings for background handler execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Background threads are named `"{thread_prefix}-{event}"`.
    pub thread_prefix: String,
    /// Stack size for background threads. `None` uses the platform default.
    pub thread_stack_size: Option<usize>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            thread_prefix: DEFAULT_THREAD_PREFIX.to_string(),
            thread_stack_size: None,
        }
    }
}

impl BusConfig {
    /// Build a config from `EVBUS_*` environment variables.
    ///
    /// Unset variables keep their defaults; unparsable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn with_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_prefix = prefix.into();
        self
    }

    pub fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Name given to a background thread running a handler for `event`.
    ///
    /// NUL bytes are stripped; the OS rejects them in thread names.
    pub fn thread_name(&self, event: &str) -> String {
        format!("{}-{}", self.thread_prefix, event).replace('\0', "")
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(prefix) = lookup(ENV_THREAD_PREFIX) {
            if prefix.trim().is_empty() {
                warn!(var = ENV_THREAD_PREFIX, "empty thread prefix; using default");
            } else {
                config.thread_prefix = prefix;
            }
        }

        if let Some(raw) = lookup(ENV_THREAD_STACK_SIZE) {
            match raw.trim().parse::<usize>() {
                Ok(bytes) if bytes > 0 => config.thread_stack_size = Some(bytes),
                _ => warn!(
                    var = ENV_THREAD_STACK_SIZE,
                    value = %raw,
                    "invalid thread stack size; using platform default"
                ),
            }
        }

        config
    }
}
