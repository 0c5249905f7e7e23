//! Events produced by the engine for the time-series sink.

use serde::{Deserialize, Serialize};

use crate::Reading;

/// A device changed liveness state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessEvent {
    /// Device name.
    pub device: String,

    /// The state the device moved into.
    pub online: bool,

    /// When the transition was observed, in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl LivenessEvent {
    /// A device came online.
    pub fn online(device: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            device: device.into(),
            online: true,
            timestamp_ms,
        }
    }

    /// A device went offline.
    pub fn offline(device: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            device: device.into(),
            online: false,
            timestamp_ms,
        }
    }
}

/// Anything the engine forwards to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Emission {
    /// An accepted reading.
    Value(Reading),

    /// A liveness transition.
    Status(LivenessEvent),
}

impl Emission {
    /// Name of the device this emission belongs to.
    pub fn device(&self) -> &str {
        match self {
            Emission::Value(reading) => &reading.device,
            Emission::Status(event) => &event.device,
        }
    }

    /// Returns the liveness event, if this is a status emission.
    pub fn as_status(&self) -> Option<&LivenessEvent> {
        match self {
            Emission::Status(event) => Some(event),
            Emission::Value(_) => None,
        }
    }

    /// Returns the reading, if this is a value emission.
    pub fn as_value(&self) -> Option<&Reading> {
        match self {
            Emission::Value(reading) => Some(reading),
            Emission::Status(_) => None,
        }
    }
}

impl From<Reading> for Emission {
    fn from(reading: Reading) -> Self {
        Emission::Value(reading)
    }
}

impl From<LivenessEvent> for Emission {
    fn from(event: LivenessEvent) -> Self {
        Emission::Status(event)
    }
}
