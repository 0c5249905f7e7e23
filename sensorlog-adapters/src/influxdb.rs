//! InfluxDB sink using the HTTP line-protocol write API.
//!
//! Each accepted reading becomes one point in a measurement named after
//! the reading's measurement, tagged with the device. Liveness changes go
//! to a `status` measurement with a boolean `online` field.
//!
//! ```text
//! temperature,device=kitchen value=21.5 1703160000000
//! status,device=kitchen online=false 1703160120000
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use sensorlog_adapters::influxdb::InfluxDbSink;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sink = InfluxDbSink::builder()
//!         .url("http://localhost:8086")
//!         .database("home")
//!         .build()?;
//!
//!     // Fail fast if the store is unreachable
//!     sink.ping().await?;
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use sensorlog_engine::{Sink, SinkError};
use sensorlog_types::{LivenessEvent, Reading};
use tracing::debug;

use crate::AdapterError;

/// Measurement that liveness changes are written to.
pub const STATUS_MEASUREMENT: &str = "status";

/// Writes emissions to an InfluxDB 1.x compatible `/write` endpoint.
#[derive(Debug, Clone)]
pub struct InfluxDbSink {
    client: Client,
    url: String,
    database: String,
    credentials: Option<(String, String)>,
}

impl InfluxDbSink {
    /// Create a new builder for configuring the sink.
    pub fn builder() -> InfluxDbSinkBuilder {
        InfluxDbSinkBuilder::default()
    }

    /// The database points are written to.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Check that the server is reachable.
    pub async fn ping(&self) -> Result<(), AdapterError> {
        let response = self.client.get(format!("{}/ping", self.url)).send().await?;

        check_status(response).await
    }

    async fn write_line(&self, line: String) -> Result<(), SinkError> {
        let mut query = vec![("db", self.database.as_str()), ("precision", "ms")];
        if let Some((user, password)) = &self.credentials {
            query.push(("u", user.as_str()));
            query.push(("p", password.as_str()));
        }

        debug!(line = %line, "writing point");

        let response = self
            .client
            .post(format!("{}/write", self.url))
            .query(&query)
            .body(line)
            .send()
            .await
            .map_err(AdapterError::from)?;

        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(AdapterError::Status {
        status: status.as_u16(),
        body: body.trim().to_string(),
    })
}

#[async_trait]
impl Sink for InfluxDbSink {
    async fn write_value(&self, reading: &Reading) -> Result<(), SinkError> {
        self.write_line(value_line(reading)).await
    }

    async fn write_status(&self, event: &LivenessEvent) -> Result<(), SinkError> {
        self.write_line(status_line(event)).await
    }
}

/// Builder for InfluxDbSink.
#[derive(Debug, Default)]
pub struct InfluxDbSinkBuilder {
    url: Option<String>,
    database: Option<String>,
    timeout: Option<Duration>,
    credentials: Option<(String, String)>,
}

impl InfluxDbSinkBuilder {
    /// Set the server URL (default: "http://localhost:8086").
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the database name (default: "home").
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the per-request timeout (default: 5 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set username and password.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Build the sink.
    pub fn build(self) -> Result<InfluxDbSink, AdapterError> {
        let url = self
            .url
            .unwrap_or_else(|| "http://localhost:8086".to_string())
            .trim_end_matches('/')
            .to_string();
        let database = self.database.unwrap_or_else(|| "home".to_string());
        if database.is_empty() {
            return Err(AdapterError::Config("database name is empty".into()));
        }

        let client = Client::builder()
            .timeout(self.timeout.unwrap_or(Duration::from_secs(5)))
            .build()?;

        Ok(InfluxDbSink {
            client,
            url,
            database,
            credentials: self.credentials,
        })
    }
}

/// Line-protocol point for an accepted reading.
pub fn value_line(reading: &Reading) -> String {
    format!(
        "{},device={} value={} {}",
        escape_measurement(&reading.measurement),
        escape_tag(&reading.device),
        reading.value,
        reading.timestamp_ms
    )
}

/// Line-protocol point for a liveness change.
pub fn status_line(event: &LivenessEvent) -> String {
    format!(
        "{},device={} online={} {}",
        STATUS_MEASUREMENT,
        escape_tag(&event.device),
        event.online,
        event.timestamp_ms
    )
}

fn escape_measurement(s: &str) -> String {
    escape(s, &[',', ' '])
}

fn escape_tag(s: &str) -> String {
    escape(s, &[',', '=', ' '])
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
