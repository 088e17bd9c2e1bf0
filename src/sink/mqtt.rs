//! MQTT publisher for snapshots
//!
//! Every new snapshot in the watch channel is serialized to JSON and
//! published to one topic. Frames that cannot be queued are dropped; the next
//! snapshot replaces them anyway. Connection status is shared through a watch
//! channel, see [`MqttHandle::status`].

use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::snapshot::Snapshot;

const DEFAULT_PORT: u16 = 1883;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    pub enabled: bool,
    /// Broker as `host:port`, the port defaults to 1883
    pub server: String,
    pub client_id: String,
    pub topic: String,
    pub keep_alive_secs: u64,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            server: "localhost:1883".to_string(),
            client_id: "xr-broadcaster".to_string(),
            topic: "xr/controllers".to_string(),
            keep_alive_secs: 5,
        }
    }
}

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    /// Most recent connection error, earlier ones only show up in `error_count`
    pub last_error: Option<String>,
    pub error_count: usize,
    pub messages_sent: usize,
    pub frames_dropped: usize,
    pub last_activity: Option<DateTime<Local>>,
}

/// Splits `host:port`, falling back to the default MQTT port
pub fn parse_server(server: &str) -> (String, u16) {
    match server.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => {
                warn!("Invalid MQTT port '{}', using {}", port, DEFAULT_PORT);
                (host.to_string(), DEFAULT_PORT)
            }
        },
        None => (server.to_string(), DEFAULT_PORT),
    }
}

pub struct MqttPublisher {
    settings: MqttSettings,
    client: AsyncClient,
    eventloop: rumqttc::EventLoop,
    status: watch::Sender<MqttStatus>,
}

impl MqttPublisher {
    pub fn new(settings: MqttSettings) -> Self {
        let (host, port) = parse_server(&settings.server);
        let mut options = MqttOptions::new(settings.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs.max(1)));

        let (client, eventloop) = AsyncClient::new(options, 10);
        let (status, _) = watch::channel(MqttStatus::default());

        Self {
            settings,
            client,
            eventloop,
            status,
        }
    }

    pub fn status(&self) -> watch::Receiver<MqttStatus> {
        self.status.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.status.send_modify(|s| s.connection_state = state);
    }

    fn record_error(&self, error: impl std::fmt::Display) {
        self.status.send_modify(|s| {
            if s.connection_state != ConnectionState::Reconnecting {
                warn!("MQTT connection error: {}", error);
            }
            s.connection_state = ConnectionState::Reconnecting;
            s.last_error = Some(error.to_string());
            s.error_count += 1;
        });
    }

    fn publish(&mut self, snapshot: &Snapshot) {
        let payload = match serde_json::to_vec(snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Cannot encode frame {}: {}", snapshot.frame, e);
                return;
            }
        };

        match self
            .client
            .try_publish(self.settings.topic.clone(), QoS::AtMostOnce, false, payload)
        {
            Ok(()) => self.status.send_modify(|s| {
                s.messages_sent += 1;
                s.last_activity = Some(Local::now());
            }),
            Err(e) => {
                self.status.send_modify(|s| s.frames_dropped += 1);
                debug!("Dropped frame {}: {}", snapshot.frame, e);
            }
        }
    }

    fn on_event(&mut self, event: Event) {
        if let Event::Incoming(Packet::ConnAck(_)) = event {
            info!("Connected to MQTT broker {}", self.settings.server);
            self.status.send_modify(|s| {
                s.connection_state = ConnectionState::Connected;
                s.last_activity = Some(Local::now());
            });
        }
    }

    async fn run(mut self, mut receiver: watch::Receiver<Snapshot>, cancel: CancellationToken) {
        info!(
            "Publishing snapshots to '{}' on {}",
            self.settings.topic, self.settings.server
        );
        self.set_state(ConnectionState::Connecting);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = receiver.changed() => {
                    if changed.is_err() {
                        debug!("Snapshot channel closed, stopping MQTT publisher");
                        break;
                    }
                    let snapshot = receiver.borrow_and_update().clone();
                    self.publish(&snapshot);
                }
                polled = self.eventloop.poll() => match polled {
                    Ok(event) => self.on_event(event),
                    Err(e) => {
                        self.record_error(e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
            }
        }

        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT disconnect failed: {}", e);
        }
        self.set_state(ConnectionState::Disconnected);
        let status = self.status.borrow();
        info!(
            "MQTT publisher stopped after {} messages ({} dropped, {} connection errors)",
            status.messages_sent, status.frames_dropped, status.error_count
        );
    }
}

pub struct MqttHandle {
    task: JoinHandle<()>,
    status: watch::Receiver<MqttStatus>,
}

impl MqttHandle {
    pub fn spawn(
        settings: MqttSettings,
        receiver: watch::Receiver<Snapshot>,
        cancel: CancellationToken,
    ) -> Self {
        let publisher = MqttPublisher::new(settings);
        let status = publisher.status();
        let task = tokio::spawn(publisher.run(receiver, cancel));
        Self { task, status }
    }

    pub fn status(&self) -> watch::Receiver<MqttStatus> {
        self.status.clone()
    }

    /// Waits for the publisher to stop and returns its final status
    pub async fn join(self) -> MqttStatus {
        if let Err(e) = self.task.await {
            debug!("MQTT task ended abnormally: {}", e);
        }
        let status = self.status.borrow().clone();
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_with_port() {
        assert_eq!(parse_server("broker.local:8883"), ("broker.local".to_string(), 8883));
    }

    #[test]
    fn server_without_port_uses_default() {
        assert_eq!(parse_server("10.0.0.5"), ("10.0.0.5".to_string(), 1883));
    }

    #[test]
    fn invalid_port_uses_default() {
        assert_eq!(parse_server("broker:abc"), ("broker".to_string(), 1883));
    }

    #[tokio::test]
    async fn publisher_queues_new_snapshots() {
        let mut publisher = MqttPublisher::new(MqttSettings::default());

        let status = publisher.status();

        publisher.publish(&Snapshot::metadata_only(1, crate::xr::types::SessionPhase::Idle));

        assert_eq!(status.borrow().messages_sent, 1);
        assert_eq!(status.borrow().frames_dropped, 0);
    }

    #[tokio::test]
    async fn repeated_connection_errors_keep_only_the_latest() {
        let publisher = MqttPublisher::new(MqttSettings::default());
        let mut status = publisher.status();

        for attempt in 0..500 {
            publisher.record_error(format!("connection refused (attempt {})", attempt));
        }

        assert!(status.has_changed().unwrap());
        let status = status.borrow_and_update();
        assert_eq!(status.connection_state, ConnectionState::Reconnecting);
        assert_eq!(status.error_count, 500);
        assert_eq!(
            status.last_error.as_deref(),
            Some("connection refused (attempt 499)")
        );
    }
}
