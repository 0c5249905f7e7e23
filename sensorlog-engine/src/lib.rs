//! # sensorlog-engine
//!
//! Device state, noise filtering and liveness tracking for sensor readings
//! streamed over a publish/subscribe transport.
//!
//! The engine decides which readings are worth storing, keeps track of
//! which devices are online, and hands accepted values plus liveness
//! changes to a [`Sink`]. Transports and sinks are collaborators; this
//! crate only defines the seams they plug into.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sensorlog_engine::{dispatch, Coordinator, JsonFileStore, LogSink, Registry, TopicLayout};
//! use sensorlog_types::KnownMeasurements;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = JsonFileStore::new("measurements_config.json");
//!     let registry = Registry::load(Box::new(store), KnownMeasurements::default())?;
//!
//!     let (coordinator, rx) = Coordinator::builder()
//!         .sweep_interval(Duration::from_secs(1))
//!         .build(registry);
//!
//!     // Forward emissions to a sink in the background
//!     let dispatcher = tokio::spawn(async move { dispatch(rx, &LogSink).await });
//!
//!     // Start the liveness sweep
//!     let sweep = coordinator.start();
//!
//!     // Feed messages from your transport
//!     let layout = TopicLayout::default();
//!     let reading = layout.decode("home/kitchen/temperature", b"21.5", coordinator.now_ms())?;
//!     coordinator.ingest(reading)?;
//!
//!     // Shut down: stop sweeping, flush offline status, drain the sink
//!     sweep.stop().await;
//!     coordinator.shutdown(coordinator.now_ms())?;
//!     drop(coordinator);
//!     dispatcher.await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Components
//!
//! - [`Registry`]: owns devices and measurements, provisions defaults and
//!   persists them through a [`ConfigStore`]
//! - [`filter`]: the dead-band accept/reject decision
//! - [`liveness`]: online/offline transitions
//! - [`Coordinator`]: serialises readings and sweeps over the registry
//! - [`dispatch`]: drains emissions into a [`Sink`]

mod coordinator;
mod error;
pub mod filter;
pub mod liveness;
mod registry;
mod sink;
mod store;
mod topic;

pub use coordinator::{
    Coordinator, CoordinatorBuilder, IngestOutcome, SweepHandle, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_SWEEP_INTERVAL,
};
pub use error::{IngestError, SinkError, StoreError};
pub use registry::{Device, MeasurementState, Registry};
pub use sink::{dispatch, DispatchStats, FileSink, LogSink, Sink};
pub use store::{ConfigStore, JsonFileStore, MemoryStore};
pub use topic::{TopicLayout, DEFAULT_TOPIC_PREFIX};

// Re-export types for convenience
pub use sensorlog_types::{Emission, KnownMeasurements, LivenessEvent, Reading, SensorConfig};
