//! Device and measurement state.

use std::collections::BTreeMap;
use std::time::Duration;

use sensorlog_types::{
    DeviceConfig, KnownMeasurements, MeasurementConfig, SensorConfig, DEFAULT_TIMEOUT_SECS,
};
use serde_json::Value;
use tracing::{error, info};

use crate::store::ConfigStore;
use crate::{IngestError, StoreError};

/// Filter configuration plus the baseline the filter compares against.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeasurementState {
    pub config: MeasurementConfig,

    /// Last value forwarded to the sink. Rejected readings never touch it.
    pub last_accepted: Option<f64>,
}

impl MeasurementState {
    fn from_config(config: MeasurementConfig) -> Self {
        Self {
            config,
            last_accepted: None,
        }
    }
}

/// Everything the engine knows about one device.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub online: bool,

    /// Arrival time of the most recent reading, accepted or not.
    pub last_seen_ms: Option<u64>,

    pub timeout: Duration,

    pub measurements: BTreeMap<String, MeasurementState>,

    /// Unrecognised config fields, written back untouched.
    extra: BTreeMap<String, Value>,
}

impl Device {
    /// A freshly provisioned, offline device.
    pub fn new(timeout: Duration) -> Self {
        Self {
            online: false,
            last_seen_ms: None,
            timeout,
            measurements: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Get the state of one measurement.
    pub fn measurement(&self, name: &str) -> Option<&MeasurementState> {
        self.measurements.get(name)
    }

    /// Restore a device from its persisted config.
    ///
    /// Liveness is never restored: a device has to send fresh traffic
    /// before it counts as online again.
    fn from_config(config: DeviceConfig) -> Self {
        Self {
            online: false,
            last_seen_ms: None,
            timeout: Duration::from_secs(config.timeout_seconds),
            measurements: config
                .measurements
                .into_iter()
                .map(|(name, m)| (name, MeasurementState::from_config(m)))
                .collect(),
            extra: config.extra,
        }
    }

    fn to_config(&self) -> DeviceConfig {
        DeviceConfig {
            timeout_seconds: self.timeout.as_secs(),
            online: self.online,
            measurements: self
                .measurements
                .iter()
                .map(|(name, state)| (name.clone(), state.config.clone()))
                .collect(),
            extra: self.extra.clone(),
        }
    }
}

/// Owns every [`Device`] and writes the config back on provisioning.
///
/// The registry is not synchronised itself; the coordinator keeps it behind
/// a single lock together with the writes it triggers.
#[derive(Debug)]
pub struct Registry {
    devices: BTreeMap<String, Device>,
    known: KnownMeasurements,
    store: Box<dyn ConfigStore>,
    default_timeout: Duration,
}

impl Registry {
    /// Load the registry from a store.
    ///
    /// Fails if the store cannot be read or holds an unusable filter
    /// width; both are startup conditions the daemon should not run past.
    pub fn load(store: Box<dyn ConfigStore>, known: KnownMeasurements) -> Result<Self, StoreError> {
        let config = store.load()?;

        for (device, device_config) in config.iter() {
            for (measurement, m) in &device_config.measurements {
                if !m.is_valid() {
                    return Err(StoreError::InvalidFilter {
                        device: device.clone(),
                        measurement: measurement.clone(),
                        filter: m.filter,
                    });
                }
            }
        }

        let devices = config
            .devices
            .into_iter()
            .map(|(name, device)| (name, Device::from_config(device)))
            .collect();

        Ok(Self {
            devices,
            known,
            store,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    /// Set the timeout given to devices provisioned from now on.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// The accepted measurement names.
    pub fn known(&self) -> &KnownMeasurements {
        &self.known
    }

    /// Get the state for a measurement, provisioning it if unseen.
    ///
    /// Provisioning a new device or measurement writes the whole config
    /// back to the store before returning. A failed write is logged and
    /// the in-memory state stays authoritative for the rest of the run.
    pub fn get_or_create(
        &mut self,
        device: &str,
        measurement: &str,
    ) -> Result<MeasurementState, IngestError> {
        if !self.known.contains(measurement) {
            return Err(IngestError::UnrecognizedMeasurement {
                device: device.to_string(),
                measurement: measurement.to_string(),
            });
        }

        // Fast path: both already exist
        if let Some(state) = self
            .devices
            .get(device)
            .and_then(|d| d.measurements.get(measurement))
        {
            return Ok(state.clone());
        }

        // Slow path: provision whatever is missing
        let default_timeout = self.default_timeout;
        let state = self
            .devices
            .entry(device.to_string())
            .or_insert_with(|| Device::new(default_timeout))
            .measurements
            .entry(measurement.to_string())
            .or_default()
            .clone();

        info!(device, measurement, "provisioned default measurement config");
        if let Err(e) = self.persist() {
            error!(
                device,
                measurement,
                store = %self.store.description(),
                error = %e,
                "failed to persist measurement config; provisioned defaults will be lost on restart"
            );
        }

        Ok(state)
    }

    /// Record an accepted value as the new filter baseline.
    ///
    /// Returns `false` if the measurement has not been provisioned.
    pub fn record_value(
        &mut self,
        device: &str,
        measurement: &str,
        value: f64,
        timestamp_ms: u64,
    ) -> bool {
        let Some(dev) = self.devices.get_mut(device) else {
            return false;
        };
        let Some(state) = dev.measurements.get_mut(measurement) else {
            return false;
        };
        state.last_accepted = Some(value);
        dev.last_seen_ms = Some(timestamp_ms);
        true
    }

    /// Update a device's last-seen time without touching any baseline.
    pub fn touch(&mut self, device: &str, timestamp_ms: u64) -> bool {
        match self.devices.get_mut(device) {
            Some(dev) => {
                dev.last_seen_ms = Some(timestamp_ms);
                true
            }
            None => false,
        }
    }

    /// Get a device by name.
    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    pub(crate) fn device_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.devices.get_mut(name)
    }

    /// Iterate over all devices in name order.
    pub fn all_devices(&self) -> impl Iterator<Item = (&str, &Device)> {
        self.devices.iter().map(|(name, d)| (name.as_str(), d))
    }

    pub(crate) fn all_devices_mut(&mut self) -> impl Iterator<Item = (&str, &mut Device)> {
        self.devices.iter_mut().map(|(name, d)| (name.as_str(), d))
    }

    /// Number of known devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if no device has been seen or configured.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Number of devices currently online.
    pub fn online_count(&self) -> usize {
        self.devices.values().filter(|d| d.online).count()
    }

    /// Build the persisted form of the registry.
    pub fn to_config(&self) -> SensorConfig {
        SensorConfig {
            devices: self
                .devices
                .iter()
                .map(|(name, d)| (name.clone(), d.to_config()))
                .collect(),
        }
    }

    /// Write the full registry to the store.
    pub fn persist(&self) -> Result<(), StoreError> {
        self.store.save(&self.to_config())
    }

    /// Human-readable location of the backing store.
    pub fn store_description(&self) -> String {
        self.store.description()
    }
}
