//! # sensorlog
//!
//! Logs sensor readings from an MQTT broker into InfluxDB, dropping noise
//! with a per-measurement dead-band filter and recording when devices go
//! quiet.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   home/<device>/<measurement>   ┌─────────────┐
//! │  Broker  │────────────────────────────────▶│ MqttSource  │
//! └──────────┘                                 └──────┬──────┘
//!                                                     │ Reading
//!                                                     ▼
//!                      ┌───────────────────────────────────────────┐
//!                      │ Coordinator                               │
//!                      │   Registry ─ filter ─ liveness   (sweep) │
//!                      └──────────────┬────────────────────────────┘
//!                                     │ Emission (mpsc)
//!                                     ▼
//!                              ┌─────────────┐
//!                              │  dispatch   │──▶ InfluxDbSink | LogSink
//!                              └─────────────┘
//! ```
//!
//! - **[`settings`]**: file + environment configuration
//! - **[`app`]**: wiring and the shutdown sequence
//!
//! The engine itself lives in `sensorlog-engine`; transports and stores in
//! `sensorlog-adapters`.
//!
//! ## Usage
//!
//! ```bash
//! # Run against the defaults (broker and InfluxDB on localhost)
//! sensorlog
//!
//! # Use a settings file and log instead of writing to InfluxDB
//! sensorlog --config sensorlog.toml --dry-run
//!
//! # Validate settings and the measurement config, then exit
//! sensorlog --check
//! ```

pub mod app;
pub mod settings;

pub use settings::Settings;
