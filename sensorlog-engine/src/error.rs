//! Error types for the engine.

use std::path::PathBuf;

use thiserror::Error;

/// Why a single inbound message was dropped.
///
/// None of these are fatal: the message is logged and ingestion continues.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The topic names a measurement outside the known set.
    #[error("unrecognised measurement {measurement:?} from device {device:?}")]
    UnrecognizedMeasurement { device: String, measurement: String },

    /// The topic or payload could not be decoded.
    #[error("malformed reading on {topic:?}: {reason}")]
    MalformedReading { topic: String, reason: String },
}

impl IngestError {
    pub(crate) fn malformed(topic: &str, reason: impl Into<String>) -> Self {
        IngestError::MalformedReading {
            topic: topic.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors reading or writing the persisted measurement config.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The config file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The config file could not be written.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The config file is not valid JSON for the expected schema.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The config could not be serialized.
    #[error("failed to serialize config: {0}")]
    Serialize(serde_json::Error),

    /// A measurement carries a negative or non-finite filter width.
    #[error("invalid filter width {filter} for {device}/{measurement}")]
    InvalidFilter {
        device: String,
        measurement: String,
        filter: f64,
    },

    /// A store that has been told to fail (test double).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors writing to the time-series sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The store could not be reached.
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    /// The store answered but refused the write.
    #[error("sink rejected write: {0}")]
    Rejected(String),
}
