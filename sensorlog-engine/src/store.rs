//! Durable storage for the measurement config.

use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sensorlog_types::SensorConfig;
use serde::Serialize;

use crate::StoreError;

/// Where the registry loads its config from and writes it back to.
///
/// Saves happen synchronously while the registry lock is held, so an
/// implementation must not block for long.
pub trait ConfigStore: Send + Debug {
    /// Load the full config. A store with nothing saved yet returns an
    /// empty config rather than an error.
    fn load(&self) -> Result<SensorConfig, StoreError>;

    /// Replace the stored config.
    fn save(&self, config: &SensorConfig) -> Result<(), StoreError>;

    /// Human-readable location, used in log lines.
    fn description(&self) -> String;
}

/// Stores the config as a pretty-printed JSON file.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so a crash mid-write leaves the previous version intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store for the given path. The file need not exist yet.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Returns the path being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> Result<SensorConfig, StoreError> {
        if !self.path.exists() {
            return Ok(SensorConfig::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, config: &SensorConfig) -> Result<(), StoreError> {
        let mut json = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut json, formatter);
        config
            .serialize(&mut serializer)
            .map_err(StoreError::Serialize)?;
        json.push(b'\n');

        let temp = self.temp_path();
        fs::write(&temp, &json)
            .and_then(|_| fs::rename(&temp, &self.path))
            .map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })
    }

    fn description(&self) -> String {
        format!("file: {}", self.path.display())
    }
}

/// Keeps the config in memory.
///
/// Clones share the same contents, so a test can hand one clone to the
/// registry and inspect writes through another. Used for dry runs as well.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    config: Mutex<SensorConfig>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with a config.
    pub fn with_config(config: SensorConfig) -> Self {
        let store = Self::default();
        *store.inner.config.lock() = config;
        store
    }

    /// The most recently saved (or pre-loaded) config.
    pub fn config(&self) -> SensorConfig {
        self.inner.config.lock().clone()
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.inner.saves.load(Ordering::Relaxed)
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::Relaxed);
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<SensorConfig, StoreError> {
        Ok(self.config())
    }

    fn save(&self, config: &SensorConfig) -> Result<(), StoreError> {
        if self.inner.failing.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("memory store set to fail".into()));
        }
        *self.inner.config.lock() = config.clone();
        self.inner.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn description(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlog_types::{DeviceConfig, MeasurementConfig};
    use tempfile::TempDir;

    fn sample_config() -> SensorConfig {
        let mut device = DeviceConfig::with_timeout(300);
        device
            .measurements
            .insert("temperature".into(), MeasurementConfig::absolute(0.5));
        let mut config = SensorConfig::new();
        config.insert("kitchen", device);
        config
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("absent.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_returns_same_config() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("measurements_config.json"));

        store.save(&sample_config()).unwrap();
        assert_eq!(store.load().unwrap(), sample_config());
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn saved_file_uses_four_space_indent() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("config.json"));
        store.save(&sample_config()).unwrap();

        let content = fs::read_to_string(store.path()).unwrap();
        assert!(content.contains("\n    \"kitchen\": {"));
        assert!(content.contains("\"filter_type\": \"absolute\""));
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = JsonFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn unwritable_location_is_a_write_error() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("missing-dir").join("config.json"));

        let err = store.save(&sample_config()).unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
    }

    #[test]
    fn memory_store_counts_saves_and_can_fail() {
        let store = MemoryStore::new();
        let handle = store.clone();

        store.save(&sample_config()).unwrap();
        assert_eq!(handle.save_count(), 1);
        assert_eq!(handle.config(), sample_config());

        handle.set_failing(true);
        assert!(store.save(&SensorConfig::new()).is_err());
        assert_eq!(handle.save_count(), 1);
        assert_eq!(handle.config(), sample_config());
    }
}
