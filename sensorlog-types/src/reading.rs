//! A single decoded sensor reading.

use serde::{Deserialize, Serialize};

use crate::current_timestamp_ms;

/// One value reported by a device for one measurement.
///
/// Readings are transient: the engine consumes each one exactly once and
/// only keeps the value around if the filter accepts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Device name, taken from the topic hierarchy.
    pub device: String,

    /// Measurement name (e.g. `temperature`).
    pub measurement: String,

    /// The reported value.
    pub value: f64,

    /// Arrival time in milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl Reading {
    /// Create a reading with an explicit arrival timestamp.
    pub fn new(
        device: impl Into<String>,
        measurement: impl Into<String>,
        value: f64,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            device: device.into(),
            measurement: measurement.into(),
            value,
            timestamp_ms,
        }
    }

    /// Create a reading stamped with the current wall-clock time.
    pub fn now(device: impl Into<String>, measurement: impl Into<String>, value: f64) -> Self {
        Self::new(device, measurement, value, current_timestamp_ms())
    }
}
