//! The ingestion coordinator: one entry point for readings and sweeps.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sensorlog_types::{current_timestamp_ms, Emission, Reading};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::Registry;
use crate::{filter, liveness, IngestError, StoreError};

/// Default pause between two liveness sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Default capacity of the emission channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// What happened to a reading that made it past validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Forwarded to the sink and recorded as the new baseline.
    Accepted,
    /// Suppressed by the dead-band filter.
    Rejected,
}

/// Drives registry, filter and liveness for every reading and sweep.
///
/// Cloning is cheap and every clone shares the same registry, so the
/// transport callback and the sweep loop can each hold one. All registry
/// access, including the provisioning write it may trigger, happens under
/// one lock. Emissions are queued with `try_send` while that lock is held,
/// which keeps them in state-transition order without ever waiting on the
/// sink.
///
/// # Example
///
/// ```rust
/// use sensorlog_engine::{Coordinator, MemoryStore, Registry};
/// use sensorlog_types::{KnownMeasurements, Reading};
///
/// let registry = Registry::load(Box::new(MemoryStore::new()), KnownMeasurements::default())
///     .unwrap();
/// let (coordinator, mut rx) = Coordinator::builder().build(registry);
///
/// coordinator
///     .ingest(Reading::new("kitchen", "temperature", 21.0, 1_000))
///     .unwrap();
///
/// // The device comes online before its first value is forwarded.
/// assert!(rx.try_recv().unwrap().as_status().unwrap().online);
/// assert_eq!(rx.try_recv().unwrap().as_value().unwrap().value, 21.0);
/// ```
#[derive(Debug, Clone)]
pub struct Coordinator {
    registry: Arc<Mutex<Registry>>,
    emitter: mpsc::Sender<Emission>,
    sweep_interval: Duration,
    clock: Clock,
}

impl Coordinator {
    /// Create a builder for configuring the coordinator.
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Process one decoded reading.
    ///
    /// Unknown measurements are rejected before any state is touched.
    /// Otherwise the device is brought online if needed (its status event
    /// is queued before the value), the filter decides whether the value
    /// is forwarded, and the device's last-seen time is updated either way.
    pub fn ingest(&self, reading: Reading) -> Result<IngestOutcome, IngestError> {
        let mut registry = self.registry.lock();

        let state = match registry.get_or_create(&reading.device, &reading.measurement) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    device = %reading.device,
                    measurement = %reading.measurement,
                    "ignoring unrecognized measurement"
                );
                return Err(e);
            }
        };

        if let Some(device) = registry.device_mut(&reading.device) {
            if let Some(event) =
                liveness::observe_arrival(&reading.device, device, reading.timestamp_ms)
            {
                info!(device = %reading.device, "device online");
                self.emit(event.into());
            }
        }

        let outcome = if filter::accept(reading.value, &state, true) {
            registry.record_value(
                &reading.device,
                &reading.measurement,
                reading.value,
                reading.timestamp_ms,
            );
            debug!(
                device = %reading.device,
                measurement = %reading.measurement,
                value = reading.value,
                "reading accepted"
            );
            self.emit(Emission::Value(reading.clone()));
            IngestOutcome::Accepted
        } else {
            debug!(
                device = %reading.device,
                measurement = %reading.measurement,
                value = reading.value,
                last_accepted = ?state.last_accepted,
                threshold = state.config.filter,
                "reading rejected by dead-band filter"
            );
            IngestOutcome::Rejected
        };

        registry.touch(&reading.device, reading.timestamp_ms);
        Ok(outcome)
    }

    /// Take every online device whose timeout has elapsed offline.
    ///
    /// Returns how many devices went offline.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let mut registry = self.registry.lock();
        let mut count = 0;

        for (name, device) in registry.all_devices_mut() {
            if let Some(event) = liveness::check_timeout(name, device, now_ms) {
                info!(device = %name, last_seen_ms = ?device.last_seen_ms, "device offline");
                self.emit(event.into());
                count += 1;
            }
        }

        count
    }

    /// Mark every device offline and write the registry back.
    ///
    /// One offline event is queued per device that was online. Returns
    /// that count, or the persistence error if the final write failed.
    pub fn shutdown(&self, now_ms: u64) -> Result<usize, StoreError> {
        let mut registry = self.registry.lock();
        let mut count = 0;

        for (name, device) in registry.all_devices_mut() {
            if let Some(event) = liveness::force_offline(name, device, now_ms) {
                self.emit(event.into());
                count += 1;
            }
        }

        registry.persist()?;
        info!(devices = registry.len(), went_offline = count, "registry flushed");
        Ok(count)
    }

    /// Start the periodic sweep on the current tokio runtime.
    ///
    /// Returns a handle that stops the loop.
    pub fn start(&self) -> SweepHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let coordinator = self.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(coordinator.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        coordinator.sweep(coordinator.now_ms());
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("sweep loop stopped");
        });

        SweepHandle { stop_tx, task }
    }

    /// Current time on the coordinator's clock, in milliseconds since the
    /// Unix epoch. Transports should stamp readings with this.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Run a closure with read access to the registry.
    pub fn with_registry<R>(&self, f: impl FnOnce(&Registry) -> R) -> R {
        f(&self.registry.lock())
    }

    fn emit(&self, emission: Emission) {
        match self.emitter.try_send(emission) {
            Ok(()) => {}
            Err(TrySendError::Full(emission)) => {
                warn!(device = %emission.device(), "emission channel full; dropping emission");
            }
            Err(TrySendError::Closed(emission)) => {
                warn!(device = %emission.device(), "emission channel closed; dropping emission");
            }
        }
    }
}

/// Wall-clock milliseconds anchored once and advanced monotonically.
///
/// Anchoring keeps the sweep immune to wall-clock jumps and lets paused
/// tokio time drive it in tests.
#[derive(Debug, Clone, Copy)]
struct Clock {
    origin_ms: u64,
    origin: tokio::time::Instant,
}

impl Clock {
    fn new() -> Self {
        Self {
            origin_ms: current_timestamp_ms(),
            origin: tokio::time::Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin_ms + self.origin.elapsed().as_millis() as u64
    }
}

/// Builder for configuring a Coordinator.
#[derive(Debug, Default)]
pub struct CoordinatorBuilder {
    sweep_interval: Option<Duration>,
    channel_capacity: Option<usize>,
}

impl CoordinatorBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pause between liveness sweeps.
    ///
    /// Defaults to 1 second if not specified.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Set how many emissions may wait for the sink before new ones are
    /// dropped.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    /// Build the coordinator around a loaded registry.
    ///
    /// Returns the coordinator and the receiving end of its emission
    /// channel, which should be handed to [`dispatch`](crate::dispatch).
    pub fn build(self, registry: Registry) -> (Coordinator, mpsc::Receiver<Emission>) {
        let capacity = self
            .channel_capacity
            .unwrap_or(DEFAULT_CHANNEL_CAPACITY)
            .max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let coordinator = Coordinator {
            registry: Arc::new(Mutex::new(registry)),
            emitter: tx,
            sweep_interval: self.sweep_interval.unwrap_or(DEFAULT_SWEEP_INTERVAL),
            clock: Clock::new(),
        };

        (coordinator, rx)
    }
}

/// Handle for controlling the background sweep.
///
/// Dropping the handle also stops the loop.
#[derive(Debug)]
pub struct SweepHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Stop the sweep loop and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use sensorlog_types::{DeviceConfig, KnownMeasurements, MeasurementConfig, SensorConfig};

    const TIMEOUT_MS: u64 = 120_000;

    /// Log output collected from a scoped subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl CapturedLogs {
        fn count(&self, level: &str) -> usize {
            String::from_utf8_lossy(&self.0.lock())
                .lines()
                .filter(|line| line.contains(level))
                .count()
        }
    }

    fn with_captured_logs<R>(f: impl FnOnce() -> R) -> (R, CapturedLogs) {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        let result = tracing::subscriber::with_default(subscriber, f);
        (result, logs)
    }

    fn coordinator_with(config: SensorConfig) -> (Coordinator, mpsc::Receiver<Emission>, MemoryStore) {
        let store = MemoryStore::with_config(config);
        let registry =
            Registry::load(Box::new(store.clone()), KnownMeasurements::default()).unwrap();
        let (coordinator, rx) = Coordinator::builder().build(registry);
        (coordinator, rx, store)
    }

    fn kitchen_with_dead_band(threshold: f64) -> SensorConfig {
        let mut device = DeviceConfig::default();
        device
            .measurements
            .insert("temperature".into(), MeasurementConfig::absolute(threshold));
        let mut config = SensorConfig::new();
        config.insert("kitchen", device);
        config
    }

    fn drain(rx: &mut mpsc::Receiver<Emission>) -> Vec<Emission> {
        let mut out = Vec::new();
        while let Ok(emission) = rx.try_recv() {
            out.push(emission);
        }
        out
    }

    #[test]
    fn kitchen_dead_band_scenario() {
        let (coordinator, mut rx, _) = coordinator_with(kitchen_with_dead_band(1.0));

        let outcomes: Vec<_> = [20.0, 20.2, 25.0, 24.9]
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                coordinator
                    .ingest(Reading::new("kitchen", "temperature", v, i as u64 * 1_000))
                    .unwrap()
            })
            .collect();

        assert_eq!(
            outcomes,
            vec![
                IngestOutcome::Accepted,
                IngestOutcome::Rejected,
                IngestOutcome::Accepted,
                IngestOutcome::Rejected,
            ]
        );

        let emissions = drain(&mut rx);
        let values: Vec<f64> = emissions
            .iter()
            .filter_map(|e| e.as_value())
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![20.0, 25.0]);

        let statuses: Vec<_> = emissions.iter().filter_map(|e| e.as_status()).collect();
        assert_eq!(statuses.len(), 1);
        assert!(statuses[0].online);
    }

    #[test]
    fn online_event_precedes_first_value() {
        let (coordinator, mut rx, _) = coordinator_with(SensorConfig::new());
        coordinator
            .ingest(Reading::new("porch", "humidity", 55.0, 10))
            .unwrap();

        let emissions = drain(&mut rx);
        assert_eq!(emissions.len(), 2);
        assert_eq!(emissions[0].as_status().unwrap().timestamp_ms, 10);
        assert_eq!(emissions[1].as_value().unwrap().value, 55.0);
    }

    #[test]
    fn no_filter_forwards_every_value() {
        let (coordinator, mut rx, _) = coordinator_with(SensorConfig::new());
        for (i, v) in [20.0, 20.0, 20.0, 20.1, 19.9].into_iter().enumerate() {
            let outcome = coordinator
                .ingest(Reading::new("porch", "temperature", v, i as u64))
                .unwrap();
            assert_eq!(outcome, IngestOutcome::Accepted);
        }

        let values = drain(&mut rx).iter().filter(|e| e.as_value().is_some()).count();
        assert_eq!(values, 5);
    }

    #[test]
    fn baseline_does_not_drift_with_noise() {
        let (coordinator, mut rx, _) = coordinator_with(kitchen_with_dead_band(1.0));

        // Each step is under the threshold from its predecessor, but the
        // last one is a full unit away from the accepted baseline.
        for (i, v) in [20.0, 20.5, 20.75, 21.0].into_iter().enumerate() {
            coordinator
                .ingest(Reading::new("kitchen", "temperature", v, i as u64))
                .unwrap();
        }

        let values: Vec<f64> = drain(&mut rx)
            .iter()
            .filter_map(|e| e.as_value())
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![20.0, 21.0]);
    }

    #[test]
    fn unrecognized_measurement_leaves_no_trace() {
        let (coordinator, mut rx, store) = coordinator_with(SensorConfig::new());

        let err = coordinator
            .ingest(Reading::new("kitchen", "pressure", 1013.0, 0))
            .unwrap_err();

        assert!(matches!(err, IngestError::UnrecognizedMeasurement { .. }));
        assert!(coordinator.with_registry(|r| r.is_empty()));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(store.save_count(), 0);
    }

    #[test]
    fn unrecognized_measurement_is_warned_once() {
        let (coordinator, mut rx, _store) = coordinator_with(SensorConfig::new());

        let (result, logs) = with_captured_logs(|| {
            coordinator.ingest(Reading::new("kitchen", "pressure", 1013.0, 0))
        });

        assert!(result.is_err());
        assert_eq!(logs.count(" WARN "), 1);
        assert_eq!(logs.count(" ERROR "), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn provisioning_persists_once() {
        let (coordinator, _rx, store) = coordinator_with(SensorConfig::new());
        for i in 0..10 {
            coordinator
                .ingest(Reading::new("kitchen", "temperature", i as f64, i))
                .unwrap();
        }
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn rejected_readings_still_refresh_liveness() {
        let (coordinator, mut rx, _) = coordinator_with(kitchen_with_dead_band(5.0));

        coordinator
            .ingest(Reading::new("kitchen", "temperature", 20.0, 0))
            .unwrap();
        // Suppressed values keep arriving; the device must stay online.
        for t in [60_000, 120_000, 180_000] {
            let outcome = coordinator
                .ingest(Reading::new("kitchen", "temperature", 20.1, t))
                .unwrap();
            assert_eq!(outcome, IngestOutcome::Rejected);
        }
        drain(&mut rx);

        assert_eq!(coordinator.sweep(180_000 + TIMEOUT_MS - 1), 0);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(
            coordinator.with_registry(|r| r.device("kitchen").unwrap().last_seen_ms),
            Some(180_000)
        );
    }

    #[test]
    fn sweep_takes_device_offline_once_at_deadline() {
        let (coordinator, mut rx, _) = coordinator_with(SensorConfig::new());
        coordinator
            .ingest(Reading::new("kitchen", "temperature", 20.0, 1_000))
            .unwrap();
        drain(&mut rx);

        assert_eq!(coordinator.sweep(1_000 + TIMEOUT_MS - 1), 0);
        assert!(drain(&mut rx).is_empty());

        assert_eq!(coordinator.sweep(1_000 + TIMEOUT_MS), 1);
        let emissions = drain(&mut rx);
        assert_eq!(emissions.len(), 1);
        assert!(!emissions[0].as_status().unwrap().online);

        assert_eq!(coordinator.sweep(1_000 + 10 * TIMEOUT_MS), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn liveness_events_alternate() {
        let (coordinator, mut rx, _) = coordinator_with(SensorConfig::new());
        let mut t = 0;
        for _ in 0..3 {
            coordinator
                .ingest(Reading::new("kitchen", "humidity", 40.0, t))
                .unwrap();
            coordinator
                .ingest(Reading::new("kitchen", "humidity", 41.0, t + 1))
                .unwrap();
            t += TIMEOUT_MS + 1;
            coordinator.sweep(t);
            coordinator.sweep(t + 1);
            t += 10;
        }

        let states: Vec<bool> = drain(&mut rx)
            .iter()
            .filter_map(|e| e.as_status())
            .map(|s| s.online)
            .collect();
        assert_eq!(states, vec![true, false, true, false, true, false]);
    }

    #[test]
    fn sweep_is_independent_per_device() {
        let mut config = SensorConfig::new();
        config.insert("fast", DeviceConfig::with_timeout(10));
        config.insert("slow", DeviceConfig::with_timeout(600));
        let (coordinator, mut rx, _) = coordinator_with(config);

        coordinator.ingest(Reading::new("fast", "temperature", 1.0, 0)).unwrap();
        coordinator.ingest(Reading::new("slow", "temperature", 1.0, 0)).unwrap();
        drain(&mut rx);

        assert_eq!(coordinator.sweep(10_000), 1);
        let offline: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| e.as_status().map(|s| s.device.clone()))
            .collect();
        assert_eq!(offline, vec!["fast".to_string()]);
        assert!(coordinator.with_registry(|r| r.device("slow").unwrap().online));
    }

    #[test]
    fn device_returning_after_timeout_keeps_baseline() {
        let (coordinator, mut rx, _) = coordinator_with(kitchen_with_dead_band(1.0));
        coordinator
            .ingest(Reading::new("kitchen", "temperature", 20.0, 0))
            .unwrap();
        coordinator.sweep(TIMEOUT_MS);
        drain(&mut rx);

        let outcome = coordinator
            .ingest(Reading::new("kitchen", "temperature", 20.2, TIMEOUT_MS + 5))
            .unwrap();

        assert_eq!(outcome, IngestOutcome::Rejected);
        let emissions = drain(&mut rx);
        assert_eq!(emissions.len(), 1);
        assert!(emissions[0].as_status().unwrap().online);
    }

    #[test]
    fn shutdown_flushes_offline_snapshot() {
        let (coordinator, mut rx, store) = coordinator_with(SensorConfig::new());
        coordinator.ingest(Reading::new("a", "temperature", 1.0, 0)).unwrap();
        coordinator.ingest(Reading::new("b", "temperature", 1.0, 0)).unwrap();
        coordinator.sweep(TIMEOUT_MS);
        coordinator.ingest(Reading::new("b", "humidity", 50.0, TIMEOUT_MS + 1)).unwrap();
        drain(&mut rx);
        let saves_before = store.save_count();

        assert_eq!(coordinator.shutdown(TIMEOUT_MS + 2).unwrap(), 1);

        let emissions = drain(&mut rx);
        assert_eq!(emissions.len(), 1);
        assert_eq!(emissions[0].device(), "b");
        assert!(!emissions[0].as_status().unwrap().online);

        assert_eq!(store.save_count(), saves_before + 1);
        assert!(store.config().iter().all(|(_, d)| !d.online));
    }

    #[test]
    fn shutdown_reports_persistence_failure() {
        let (coordinator, _rx, store) = coordinator_with(SensorConfig::new());
        store.set_failing(true);
        assert!(coordinator.shutdown(0).is_err());
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let registry =
            Registry::load(Box::new(MemoryStore::new()), KnownMeasurements::default()).unwrap();
        let (coordinator, mut rx) = Coordinator::builder().channel_capacity(1).build(registry);

        for i in 0..5 {
            coordinator
                .ingest(Reading::new("kitchen", "temperature", i as f64, i))
                .unwrap();
        }

        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(
            coordinator.with_registry(|r| r
                .device("kitchen")
                .unwrap()
                .measurement("temperature")
                .unwrap()
                .last_accepted),
            Some(4.0)
        );
    }

    #[test]
    fn closed_channel_does_not_stop_ingestion() {
        let (coordinator, rx, _) = coordinator_with(SensorConfig::new());
        drop(rx);
        assert!(coordinator
            .ingest(Reading::new("kitchen", "temperature", 1.0, 0))
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweep_emits_offline_after_timeout() {
        let registry =
            Registry::load(Box::new(MemoryStore::new()), KnownMeasurements::default()).unwrap();
        let (coordinator, mut rx) = Coordinator::builder()
            .sweep_interval(Duration::from_secs(1))
            .build(registry);
        let handle = coordinator.start();

        coordinator
            .ingest(Reading::new("kitchen", "temperature", 20.0, coordinator.now_ms()))
            .unwrap();
        assert!(rx.recv().await.unwrap().as_status().unwrap().online);
        assert!(rx.recv().await.unwrap().as_value().is_some());

        tokio::time::sleep(Duration::from_secs(119)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let event = rx.recv().await.unwrap();
        assert!(!event.as_status().unwrap().online);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_the_sweep_ends_the_task() {
        let registry =
            Registry::load(Box::new(MemoryStore::new()), KnownMeasurements::default()).unwrap();
        let (coordinator, _rx) = Coordinator::builder().build(registry);

        let handle = coordinator.start();
        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.stop().await;
    }
}
