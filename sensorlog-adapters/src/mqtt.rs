//! MQTT source feeding sensor readings into the engine.
//!
//! Subscribes to `<prefix>/#`, decodes each publish as a reading and hands
//! it to a [`Coordinator`]. The subscription is renewed on every ConnAck so
//! it survives broker restarts.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sensorlog_adapters::mqtt::MqttSource;
//!
//! let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//! let source = MqttSource::builder()
//!     .host("broker.local")
//!     .client_id("sensorlog")
//!     .build();
//!
//! tokio::spawn(source.run(coordinator.clone(), stop_rx));
//! // later
//! stop_tx.send(true)?;
//! ```

use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use sensorlog_engine::{Coordinator, IngestError, IngestOutcome, TopicLayout};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Capacity of the request channel between client and event loop.
const REQUEST_CAPACITY: usize = 10;

/// Subscribes to sensor topics and ingests every publish.
#[derive(Debug, Clone)]
pub struct MqttSource {
    host: String,
    port: u16,
    client_id: String,
    keep_alive: Duration,
    layout: TopicLayout,
    subscription: String,
    reconnect_delay: Duration,
}

impl MqttSource {
    /// Create a new builder for configuring the source.
    pub fn builder() -> MqttSourceBuilder {
        MqttSourceBuilder::default()
    }

    /// Topic filter subscribed to on connect.
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options
    }

    /// Run until `stop` flips to true or its sender is dropped.
    ///
    /// Connection errors never end the loop; the event loop is polled again
    /// after the reconnect delay, which makes rumqttc reconnect.
    pub async fn run(self, coordinator: Coordinator, mut stop: watch::Receiver<bool>) {
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        let mut backoff = false;

        info!(
            host = %self.host,
            port = self.port,
            subscription = %self.subscription,
            "MQTT source starting"
        );

        loop {
            if *stop.borrow() {
                break;
            }

            if backoff {
                backoff = false;
                tokio::select! {
                    _ = tokio::time::sleep(self.reconnect_delay) => {}
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
                continue;
            }

            tokio::select! {
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(subscription = %self.subscription, "connected to broker; subscribing");
                        if let Err(e) = client.try_subscribe(self.subscription.as_str(), QoS::AtMostOnce) {
                            error!(error = %e, "failed to queue subscription");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let _ = handle_message(
                            &coordinator,
                            &self.layout,
                            &publish.topic,
                            &publish.payload,
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(
                            error = %e,
                            retry_in_ms = self.reconnect_delay.as_millis() as u64,
                            "MQTT connection error"
                        );
                        backoff = true;
                    }
                },
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = client.try_disconnect() {
            debug!(error = %e, "disconnect request not queued");
        } else {
            // One more poll lets the event loop send the DISCONNECT packet.
            let _ = tokio::time::timeout(Duration::from_millis(500), eventloop.poll()).await;
        }
        info!("MQTT source stopped");
    }
}

/// Decode one message and ingest it. Every dropped message is warned
/// about exactly once.
pub fn handle_message(
    coordinator: &Coordinator,
    layout: &TopicLayout,
    topic: &str,
    payload: &[u8],
) -> Result<IngestOutcome, IngestError> {
    let result = layout
        .decode(topic, payload, coordinator.now_ms())
        .and_then(|reading| coordinator.ingest(reading));

    match &result {
        Ok(outcome) => debug!(topic, ?outcome, "message handled"),
        // Already warned about by the coordinator.
        Err(e @ IngestError::UnrecognizedMeasurement { .. }) => {
            debug!(topic, error = %e, "message dropped")
        }
        Err(e @ IngestError::MalformedReading { .. }) => {
            warn!(topic, error = %e, "dropping malformed message")
        }
    }

    result
}

/// Builder for MqttSource.
#[derive(Debug, Default)]
pub struct MqttSourceBuilder {
    host: Option<String>,
    port: Option<u16>,
    client_id: Option<String>,
    keep_alive: Option<Duration>,
    layout: Option<TopicLayout>,
    subscription: Option<String>,
    reconnect_delay: Option<Duration>,
}

impl MqttSourceBuilder {
    /// Set the broker host (default: "127.0.0.1").
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the broker port (default: 1883).
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the client id (default: "sensorlog").
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the keep-alive interval (default: 60 seconds).
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    /// Set how topics are split into device and measurement.
    pub fn topic_layout(mut self, layout: TopicLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Override the topic filter (default: `<prefix>/#`).
    pub fn subscription(mut self, subscription: impl Into<String>) -> Self {
        self.subscription = Some(subscription.into());
        self
    }

    /// Set the pause after a connection error (default: 5 seconds).
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }

    /// Build the source.
    pub fn build(self) -> MqttSource {
        let layout = self.layout.unwrap_or_default();
        let subscription = self
            .subscription
            .unwrap_or_else(|| layout.subscription());

        MqttSource {
            host: self.host.unwrap_or_else(|| "127.0.0.1".to_string()),
            port: self.port.unwrap_or(1883),
            client_id: self.client_id.unwrap_or_else(|| "sensorlog".to_string()),
            keep_alive: self.keep_alive.unwrap_or(Duration::from_secs(60)),
            layout,
            subscription,
            reconnect_delay: self.reconnect_delay.unwrap_or(Duration::from_secs(5)),
        }
    }
}
