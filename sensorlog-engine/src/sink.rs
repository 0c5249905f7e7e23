//! Emission sinks and the task that feeds them.

use std::fmt::Debug;
use std::path::PathBuf;

use async_trait::async_trait;
use sensorlog_types::{Emission, LivenessEvent, Reading};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::SinkError;

/// Destination for accepted readings and liveness changes.
///
/// The engine treats both writes as fire-and-forget: an error is logged by
/// the dispatcher and the emission is dropped. Retrying, if wanted, is up
/// to the implementation.
#[async_trait]
pub trait Sink: Send + Sync + Debug {
    /// Write one accepted reading.
    async fn write_value(&self, reading: &Reading) -> Result<(), SinkError>;

    /// Write one liveness change.
    async fn write_status(&self, event: &LivenessEvent) -> Result<(), SinkError>;
}

/// Logs every emission instead of storing it.
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn write_value(&self, reading: &Reading) -> Result<(), SinkError> {
        info!(
            device = %reading.device,
            measurement = %reading.measurement,
            value = reading.value,
            timestamp_ms = reading.timestamp_ms,
            "value"
        );
        Ok(())
    }

    async fn write_status(&self, event: &LivenessEvent) -> Result<(), SinkError> {
        info!(
            device = %event.device,
            online = event.online,
            timestamp_ms = event.timestamp_ms,
            "status"
        );
        Ok(())
    }
}

/// Appends every emission to a file as one JSON object per line.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// Create a sink appending to `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn append(&self, emission: &Emission) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(emission)
            .map_err(|e| SinkError::Rejected(e.to_string()))?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| SinkError::Unavailable(format!("{}: {}", self.path.display(), e)))?;
        file.write_all(&line)
            .await
            .map_err(|e| SinkError::Unavailable(format!("{}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl Sink for FileSink {
    async fn write_value(&self, reading: &Reading) -> Result<(), SinkError> {
        self.append(&Emission::Value(reading.clone())).await
    }

    async fn write_status(&self, event: &LivenessEvent) -> Result<(), SinkError> {
        self.append(&Emission::Status(event.clone())).await
    }
}

/// Counts of what the dispatcher did before its channel closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub written: u64,
    pub failed: u64,
}

/// Drain emissions into a sink, in order, until every sender is gone.
///
/// Failed writes are logged and dropped; the loop keeps going.
pub async fn dispatch<S: Sink + ?Sized>(
    mut rx: mpsc::Receiver<Emission>,
    sink: &S,
) -> DispatchStats {
    let mut stats = DispatchStats::default();

    while let Some(emission) = rx.recv().await {
        let result = match &emission {
            Emission::Value(reading) => sink.write_value(reading).await,
            Emission::Status(event) => sink.write_status(event).await,
        };

        match result {
            Ok(()) => stats.written += 1,
            Err(e) => {
                stats.failed += 1;
                error!(device = %emission.device(), error = %e, "sink write failed; dropping emission");
            }
        }
    }

    debug!(written = stats.written, failed = stats.failed, "emission channel closed");
    stats
}
