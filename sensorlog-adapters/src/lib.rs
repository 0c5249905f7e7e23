//! # sensorlog-adapters
//!
//! Transport and storage adapters for the sensorlog engine.
//!
//! ## Supported Systems
//!
//! - **MQTT** (`mqtt` feature) - Subscribes to sensor topics and feeds
//!   decoded readings into a [`Coordinator`](sensorlog_engine::Coordinator)
//! - **InfluxDB** (`influxdb` feature) - Writes accepted values and device
//!   status changes through the HTTP line-protocol API
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sensorlog_adapters::influxdb::InfluxDbSink;
//! use sensorlog_adapters::mqtt::MqttSource;
//!
//! let sink = InfluxDbSink::builder()
//!     .url("http://localhost:8086")
//!     .database("home")
//!     .build()?;
//! sink.ping().await?;
//!
//! let source = MqttSource::builder()
//!     .host("localhost")
//!     .port(1883)
//!     .build();
//! source.run(coordinator, stop_rx).await;
//! ```

pub mod error;

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "influxdb")]
pub mod influxdb;

pub use error::AdapterError;
