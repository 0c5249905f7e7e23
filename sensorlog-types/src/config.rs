//! Persisted measurement configuration.
//!
//! The configuration file maps each device name to its timeout and to the
//! filter policy of every measurement it reports. Operators edit it by hand
//! between runs; the engine rewrites it whenever it provisions a new device
//! or measurement. Fields this crate does not know about are carried along
//! in `extra` so a rewrite never drops them.

use std::collections::BTreeMap;

use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DEFAULT_TIMEOUT_SECS;

/// Noise filter applied to a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// Every reading is forwarded.
    #[default]
    None,

    /// Dead-band around the last accepted value.
    Absolute,
}

/// Filter configuration for one (device, measurement) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementConfig {
    #[serde(default)]
    pub filter_type: FilterType,

    /// Dead-band width. Ignored unless `filter_type` is `Absolute`.
    #[serde(default)]
    pub filter: f64,

    /// Unrecognised fields, preserved across rewrites.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl MeasurementConfig {
    /// A dead-band filter of the given width.
    pub fn absolute(threshold: f64) -> Self {
        Self {
            filter_type: FilterType::Absolute,
            filter: threshold,
            extra: BTreeMap::new(),
        }
    }

    /// Whether the threshold is usable: finite and not negative.
    pub fn is_valid(&self) -> bool {
        self.filter.is_finite() && self.filter >= 0.0
    }
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            filter_type: FilterType::None,
            filter: 0.0,
            extra: BTreeMap::new(),
        }
    }
}

/// Configuration for one device.
///
/// On disk every measurement sits directly in the device object next to
/// the reserved `timeout_seconds` and `online` keys:
///
/// ```json
/// { "timeout_seconds": 120, "online": false,
///   "temperature": { "filter_type": "absolute", "filter": 1.0 } }
/// ```
///
/// Any other object-valued key is read as a measurement; scalar keys are
/// kept in `extra`. A nested `"measurements"` table is also accepted on
/// load and flattened on the next write.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Seconds without traffic before the device is considered offline.
    pub timeout_seconds: u64,

    /// Liveness at the time the file was written.
    pub online: bool,

    pub measurements: BTreeMap<String, MeasurementConfig>,

    /// Unrecognised fields, preserved across rewrites.
    pub extra: BTreeMap<String, Value>,
}

const TIMEOUT_KEY: &str = "timeout_seconds";
const ONLINE_KEY: &str = "online";
const NESTED_KEY: &str = "measurements";

impl DeviceConfig {
    fn from_fields(fields: BTreeMap<String, Value>) -> Result<Self, serde_json::Error> {
        let mut device = Self::default();
        let mut nested = BTreeMap::new();

        for (key, value) in fields {
            match key.as_str() {
                TIMEOUT_KEY => device.timeout_seconds = serde_json::from_value(value)?,
                ONLINE_KEY => device.online = serde_json::from_value(value)?,
                NESTED_KEY if is_measurement_table(&value) => {
                    nested = serde_json::from_value(value)?;
                }
                _ if value.is_object() => {
                    device.measurements.insert(key, serde_json::from_value(value)?);
                }
                _ => {
                    device.extra.insert(key, value);
                }
            }
        }

        // Flat entries win over the nested table.
        for (name, config) in nested {
            device.measurements.entry(name).or_insert(config);
        }

        Ok(device)
    }
}

fn is_measurement_table(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|table| table.values().all(Value::is_object))
}

impl Serialize for DeviceConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(TIMEOUT_KEY, &self.timeout_seconds)?;
        map.serialize_entry(ONLINE_KEY, &self.online)?;
        for (name, config) in &self.measurements {
            map.serialize_entry(name, config)?;
        }
        for (key, value) in &self.extra {
            if !self.measurements.contains_key(key) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DeviceConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = BTreeMap::<String, Value>::deserialize(deserializer)?;
        Self::from_fields(fields).map_err(de::Error::custom)
    }
}

impl DeviceConfig {
    /// A device with the given timeout and no measurements.
    pub fn with_timeout(timeout_seconds: u64) -> Self {
        Self {
            timeout_seconds,
            ..Self::default()
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            online: false,
            measurements: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

/// The whole configuration document, keyed by device name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorConfig {
    pub devices: BTreeMap<String, DeviceConfig>,
}

impl SensorConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if no devices are configured.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Number of configured devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Get the configuration for a device.
    pub fn get(&self, device: &str) -> Option<&DeviceConfig> {
        self.devices.get(device)
    }

    /// Insert or replace a device's configuration.
    pub fn insert(&mut self, device: impl Into<String>, config: DeviceConfig) {
        self.devices.insert(device.into(), config);
    }

    /// Iterate over all devices.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &DeviceConfig)> {
        self.devices.iter()
    }

    /// Total number of (device, measurement) pairs.
    pub fn measurement_count(&self) -> usize {
        self.devices.values().map(|d| d.measurements.len()).sum()
    }
}
