//! Runtime settings.
//!
//! Loaded with the `config` crate from an optional TOML file, overlaid by
//! `SENSORLOG_`-prefixed environment variables using `__` between
//! sections and keys, e.g. `SENSORLOG_MQTT__HOST=broker.local`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, Map};
use sensorlog_engine::{KnownMeasurements, TopicLayout};
use serde::Deserialize;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SENSORLOG";

/// All settings, every field defaulted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mqtt: MqttSettings,
    pub influxdb: InfluxDbSettings,
    pub measurements: MeasurementSettings,
    pub engine: EngineSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Topic filter subscribed to on connect. Defaults to
    /// `<measurements.topic_prefix>/#`.
    pub subscription: Option<String>,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "sensorlog".to_string(),
            keep_alive_secs: 60,
            subscription: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InfluxDbSettings {
    pub url: String,
    pub database: String,
    pub timeout_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for InfluxDbSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8086".to_string(),
            database: "home".to_string(),
            timeout_secs: 5,
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MeasurementSettings {
    /// Measurement names accepted from the broker.
    pub known: Vec<String>,
    /// Where per-device filter and timeout settings are persisted.
    pub config_file: PathBuf,
    pub topic_prefix: String,
    /// Timeout given to newly provisioned devices.
    pub default_timeout_secs: u64,
}

impl Default for MeasurementSettings {
    fn default() -> Self {
        Self {
            known: vec!["temperature".to_string(), "humidity".to_string()],
            config_file: PathBuf::from("measurements_config.json"),
            topic_prefix: "home".to_string(),
            default_timeout_secs: sensorlog_types::DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub sweep_interval_ms: u64,
    pub channel_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sweep_interval_ms: sensorlog_engine::DEFAULT_SWEEP_INTERVAL.as_millis() as u64,
            channel_capacity: sensorlog_engine::DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load from an optional file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit environment map instead of the process one.
    pub fn load_with_env(
        path: Option<&Path>,
        env: Option<Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("measurements.known")
            .try_parsing(true)
            .source(env);

        let settings: Settings = builder
            .add_source(environment)
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.measurements.known.is_empty() {
            return Err(ConfigError::Message(
                "measurements.known must name at least one measurement".into(),
            ));
        }
        if self.engine.sweep_interval_ms == 0 {
            return Err(ConfigError::Message(
                "engine.sweep_interval_ms must be greater than zero".into(),
            ));
        }
        if self.engine.channel_capacity == 0 {
            return Err(ConfigError::Message(
                "engine.channel_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn known_measurements(&self) -> KnownMeasurements {
        KnownMeasurements::new(self.measurements.known.iter().cloned())
    }

    /// Topic filter the MQTT source subscribes to.
    pub fn subscription(&self) -> String {
        self.mqtt
            .subscription
            .clone()
            .unwrap_or_else(|| self.topic_layout().subscription())
    }

    pub fn topic_layout(&self) -> TopicLayout {
        TopicLayout::new(self.measurements.topic_prefix.clone())
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.measurements.default_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.engine.sweep_interval_ms)
    }
}
