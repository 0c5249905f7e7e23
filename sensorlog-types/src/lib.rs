//! # sensorlog-types
//!
//! Core types shared by the sensorlog engine, its adapters and the daemon.
//!
//! - [`Reading`]: one decoded sensor value, consumed once by the engine
//! - [`LivenessEvent`]: a device going online or offline
//! - [`Emission`]: what the engine hands to the time-series sink
//! - [`SensorConfig`]: the persisted per-device, per-measurement configuration
//! - [`KnownMeasurements`]: the set of measurement names the engine accepts
//!
//! ## Example
//!
//! ```rust
//! use sensorlog_types::{FilterType, SensorConfig};
//!
//! let json = r#"{
//!     "kitchen": {
//!         "timeout_seconds": 300,
//!         "temperature": { "filter_type": "absolute", "filter": 0.5 }
//!     }
//! }"#;
//!
//! let config: SensorConfig = serde_json::from_str(json).unwrap();
//! let kitchen = config.get("kitchen").unwrap();
//! assert_eq!(kitchen.timeout_seconds, 300);
//! assert_eq!(
//!     kitchen.measurements["temperature"].filter_type,
//!     FilterType::Absolute
//! );
//! ```

mod config;
mod event;
mod measurement;
mod reading;

pub use config::*;
pub use event::*;
pub use measurement::*;
pub use reading::*;

/// Timeout applied to devices that have no `timeout_seconds` of their own.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
