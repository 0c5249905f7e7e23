//! Adapter errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// No answer from the server: refused, reset or timed out.
    #[error("server unreachable: {0}")]
    Unreachable(String),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Unusable adapter settings.
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(feature = "influxdb")]
impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            AdapterError::Config(err.to_string())
        } else {
            AdapterError::Unreachable(err.to_string())
        }
    }
}

/// Every adapter failure is transient from the engine's point of view: the
/// emission is dropped and ingestion carries on.
impl From<AdapterError> for sensorlog_engine::SinkError {
    fn from(err: AdapterError) -> Self {
        sensorlog_engine::SinkError::Unavailable(err.to_string())
    }
}
