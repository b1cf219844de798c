//! Broker session lifecycle.
//!
//! The connection manager drives the rumqttc event loop: one poll per
//! pass, heartbeat after every pass. A successful connect acknowledges
//! with ConnAck, at which point subscriptions are (re)issued and the
//! authorization handshake fires if the device is unconfigured. Any
//! event-loop error drops the session back to Disconnected and schedules
//! the next attempt after a fixed backoff.
//!
//! The retry interval is deliberately constant — no exponential growth.
//! A sustained broker outage therefore costs one connect attempt per
//! interval, a steady bounded load, in exchange for recovery latency
//! that never decays.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Packet, QoS};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::hal::PumpSwitch;
use crate::mqtt::handshake::AuthHandshake;
use crate::mqtt::publisher::TelemetryPublisher;
use crate::mqtt::router::MessageRouter;
use crate::mqtt::sink::MessageSink;
use crate::supervisor::Heartbeat;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Counters kept for operator logs; reset only by task recreation.
#[derive(Clone, Debug, Default)]
pub struct ConnectionStats {
    pub messages_received: usize,
    pub reconnects: usize,
    pub last_activity: Option<DateTime<Local>>,
}

#[derive(Clone, Debug)]
pub struct ConnectionSettings {
    /// Fixed delay between reconnect attempts. Constant by design; see
    /// the module docs.
    pub retry_delay: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
        }
    }
}

pub struct ConnectionManager<P: PumpSwitch, K: MessageSink> {
    client: AsyncClient,
    event_loop: Arc<Mutex<EventLoop>>,
    router: Arc<Mutex<MessageRouter<P, K>>>,
    handshake: Arc<Mutex<AuthHandshake>>,
    publisher: TelemetryPublisher<K>,
    link_tx: Arc<watch::Sender<bool>>,
    heartbeat: Heartbeat,
    settings: ConnectionSettings,
    state: ConnectionState,
    stats: ConnectionStats,
}

impl<P: PumpSwitch, K: MessageSink> ConnectionManager<P, K> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: AsyncClient,
        event_loop: Arc<Mutex<EventLoop>>,
        router: Arc<Mutex<MessageRouter<P, K>>>,
        handshake: Arc<Mutex<AuthHandshake>>,
        publisher: TelemetryPublisher<K>,
        link_tx: Arc<watch::Sender<bool>>,
        heartbeat: Heartbeat,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            client,
            event_loop,
            router,
            handshake,
            publisher,
            link_tx,
            heartbeat,
            settings,
            state: ConnectionState::Disconnected,
            stats: ConnectionStats::default(),
        }
    }

    /// Services the session until the task is torn down. The event loop
    /// is re-acquired through its cancel-safe lock, so a forcibly
    /// restarted instance picks up the same transport object.
    pub async fn run(mut self) {
        let mut event_loop = Arc::clone(&self.event_loop).lock_owned().await;
        self.set_state(ConnectionState::Connecting);

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    self.on_connected().await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.stats.messages_received += 1;
                    self.stats.last_activity = Some(Local::now());
                    self.router
                        .lock()
                        .await
                        .dispatch(&publish.topic, &publish.payload)
                        .await;
                }
                Ok(_) => {}
                Err(error) => {
                    self.on_disconnected(&error);
                    tokio::time::sleep(self.settings.retry_delay).await;
                    self.set_state(ConnectionState::Connecting);
                }
            }
            self.heartbeat.beat();
        }
    }

    async fn on_connected(&mut self) {
        self.set_state(ConnectionState::Connected);
        self.link_tx.send_replace(true);

        let topics = self.publisher.topics();
        for topic in [&topics.auth, &topics.control, &topics.device_control] {
            if let Err(error) = self.client.subscribe(topic.clone(), QoS::AtLeastOnce).await {
                warn!(%topic, %error, "subscribe failed");
            }
        }

        match self.publisher.store().read().await {
            Ok(state) if !state.device_configured => {
                self.handshake
                    .lock()
                    .await
                    .request_authorization(&self.publisher)
                    .await;
            }
            Ok(_) => debug!("device already configured"),
            Err(error) => warn!(%error, "store busy, configuration check skipped"),
        }
    }

    fn on_disconnected(&mut self, error: &ConnectionError) {
        if self.state == ConnectionState::Connected {
            warn!(
                %error,
                messages_received = self.stats.messages_received,
                last_activity = ?self.stats.last_activity,
                "broker connection lost"
            );
        } else {
            debug!(%error, "connect attempt failed");
        }
        self.set_state(ConnectionState::Disconnected);
        self.link_tx.send_replace(false);
        self.stats.reconnects += 1;
        debug!(reconnects = self.stats.reconnects, "reconnect scheduled");
    }

    fn set_state(&mut self, next: ConnectionState) {
        if next != self.state {
            info!(from = ?self.state, to = ?next, "connection state changed");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::DeviceIdentity;
    use crate::mqtt::messages::TopicSet;
    use crate::mqtt::router::testing::MockPump;
    use crate::mqtt::sink::testing::RecordingSink;
    use crate::store::MeasurementStore;
    use rumqttc::MqttOptions;

    fn manager(
        store: MeasurementStore,
        sink: RecordingSink,
    ) -> ConnectionManager<MockPump, RecordingSink> {
        let identity = DeviceIdentity::from_hex_source("0a1b").unwrap();
        let topics = TopicSet::new("mynode", identity.as_str());
        let publisher =
            TelemetryPublisher::new(sink.clone(), store.clone(), identity.clone(), topics.clone(), 0.5);
        let router = MessageRouter::new(
            identity.clone(),
            topics,
            store.clone(),
            MockPump::default(),
            publisher.clone(),
        );
        let handshake = AuthHandshake::new(store, Duration::from_secs(20));

        // Client is never polled in these tests; requests just queue.
        let (client, event_loop) =
            AsyncClient::new(MqttOptions::new(identity.as_str(), "127.0.0.1", 1883), 16);
        let (link_tx, _link_rx) = watch::channel(false);

        ConnectionManager::new(
            client,
            Arc::new(Mutex::new(event_loop)),
            Arc::new(Mutex::new(router)),
            Arc::new(Mutex::new(handshake)),
            publisher,
            Arc::new(link_tx),
            Heartbeat::new(),
            ConnectionSettings::default(),
        )
    }

    #[tokio::test]
    async fn connack_triggers_handshake_when_unconfigured() {
        let store = MeasurementStore::new(Duration::from_millis(100));
        let sink = RecordingSink::connected();
        let mut manager = manager(store, sink.clone());

        manager.on_connected().await;

        assert_eq!(manager.state, ConnectionState::Connected);
        assert_eq!(sink.sent_to("mynode/pump_auth").len(), 1);
    }

    #[tokio::test]
    async fn connack_skips_handshake_when_configured() {
        let store = MeasurementStore::new(Duration::from_millis(100));
        store
            .write(|state| state.device_configured = true)
            .await
            .unwrap();
        let sink = RecordingSink::connected();
        let mut manager = manager(store, sink.clone());

        manager.on_connected().await;

        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn link_flag_follows_session_state() {
        let store = MeasurementStore::new(Duration::from_millis(100));
        store
            .write(|state| state.device_configured = true)
            .await
            .unwrap();
        let sink = RecordingSink::connected();
        let mut manager = manager(store, sink);
        let link_rx = manager.link_tx.subscribe();

        manager.on_connected().await;
        assert!(*link_rx.borrow());

        manager.on_disconnected(&ConnectionError::RequestsDone);
        assert!(!*link_rx.borrow());
        assert_eq!(manager.state, ConnectionState::Disconnected);
        assert_eq!(manager.stats.reconnects, 1);
    }
}
