//! Strongly-typed identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BusError;

/// Identity of a handler.
///
/// Assigned once when a handler is built and shared by all of its clones. The
/// registry deduplicates and removes by this value, never by the handler's
/// declared name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(Uuid);

impl HandlerId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for HandlerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for HandlerId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<HandlerId> for Uuid {
    fn from(value: HandlerId) -> Self {
        value.0
    }
}

impl FromStr for HandlerId {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid =
            Uuid::from_str(s).map_err(|e| BusError::invalid_id(format!("HandlerId: {e}")))?;
        Ok(Self(uuid))
    }
}
