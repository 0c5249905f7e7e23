//! Process wiring: store, sink, coordinator, MQTT source and shutdown.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use sensorlog_adapters::influxdb::InfluxDbSink;
use sensorlog_adapters::mqtt::MqttSource;
use sensorlog_engine::{dispatch, Coordinator, JsonFileStore, LogSink, Registry, Sink};
use tokio::sync::watch;
use tracing::{error, info};

use crate::settings::Settings;

/// Load the persisted measurement config into a registry.
pub fn load_registry(settings: &Settings) -> Result<Registry> {
    let path = &settings.measurements.config_file;
    let store = JsonFileStore::new(path);

    let registry = Registry::load(Box::new(store), settings.known_measurements())
        .with_context(|| format!("failed to load measurement config from {}", path.display()))?
        .with_default_timeout(settings.default_timeout());

    Ok(registry)
}

/// Pick the sink: the log in dry-run mode, otherwise InfluxDB.
///
/// An unreachable InfluxDB is an error so the process never starts
/// dropping every value it accepts.
pub async fn connect_sink(settings: &Settings, dry_run: bool) -> Result<Box<dyn Sink>> {
    if dry_run {
        info!("dry run: emissions are logged, not stored");
        return Ok(Box::new(LogSink));
    }

    let influx = &settings.influxdb;
    let mut builder = InfluxDbSink::builder()
        .url(influx.url.as_str())
        .database(influx.database.as_str())
        .timeout(Duration::from_secs(influx.timeout_secs));
    if let (Some(user), Some(password)) = (&influx.username, &influx.password) {
        builder = builder.credentials(user.as_str(), password.as_str());
    }

    let sink = builder.build().context("invalid InfluxDB settings")?;
    sink.ping()
        .await
        .with_context(|| format!("InfluxDB at {} is not reachable", influx.url))?;
    info!(url = %influx.url, database = %influx.database, "connected to InfluxDB");

    Ok(Box::new(sink))
}

/// Build the MQTT source from settings.
pub fn mqtt_source(settings: &Settings) -> MqttSource {
    let mqtt = &settings.mqtt;
    let mut builder = MqttSource::builder()
        .host(mqtt.host.as_str())
        .port(mqtt.port)
        .client_id(mqtt.client_id.as_str())
        .keep_alive(Duration::from_secs(mqtt.keep_alive_secs))
        .topic_layout(settings.topic_layout());
    if let Some(subscription) = &mqtt.subscription {
        builder = builder.subscription(subscription.as_str());
    }
    builder.build()
}

/// One-line description of the loaded registry, for `--check`.
pub fn summary(settings: &Settings, registry: &Registry) -> String {
    let measurements: usize = registry
        .all_devices()
        .map(|(_, device)| device.measurements.len())
        .sum();
    let known: Vec<&str> = registry.known().iter().collect();

    format!(
        "{} devices, {} measurements in {}; accepting [{}] on {}:{} {}",
        registry.len(),
        measurements,
        registry.store_description(),
        known.join(", "),
        settings.mqtt.host,
        settings.mqtt.port,
        settings.subscription(),
    )
}

/// Run the logger until `shutdown` resolves, then flush and return.
pub async fn run<F>(settings: &Settings, registry: Registry, sink: Box<dyn Sink>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let (coordinator, rx) = Coordinator::builder()
        .sweep_interval(settings.sweep_interval())
        .channel_capacity(settings.engine.channel_capacity)
        .build(registry);

    let dispatcher = tokio::spawn(async move { dispatch(rx, sink.as_ref()).await });
    let sweep = coordinator.start();

    let (stop_tx, stop_rx) = watch::channel(false);
    let source = tokio::spawn(mqtt_source(settings).run(coordinator.clone(), stop_rx));

    shutdown.await;
    info!("shutting down");

    let _ = stop_tx.send(true);
    if let Err(e) = source.await {
        error!(error = %e, "MQTT task failed");
    }
    sweep.stop().await;

    match coordinator.shutdown(coordinator.now_ms()) {
        Ok(count) => info!(went_offline = count, "devices marked offline"),
        Err(e) => error!(error = %e, "failed to persist measurement config on shutdown"),
    }

    // Dropping the last sender lets the dispatcher drain and finish.
    drop(coordinator);
    let stats = dispatcher.await.context("dispatcher task failed")?;
    info!(written = stats.written, failed = stats.failed, "emissions flushed");

    Ok(())
}

/// Resolves on SIGINT or SIGTERM (ctrl-c elsewhere).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
