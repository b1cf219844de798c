//! Inbound message router.
//!
//! One explicit dispatch path for every (topic, payload) pair the
//! connection manager pulls off the wire: decode, filter by target
//! device, classify by topic, act. Dispatch order and filtering live
//! here in plain sight rather than in callback registration order.

use tracing::{debug, info, warn};

use crate::hal::PumpSwitch;
use crate::identity::DeviceIdentity;
use crate::mqtt::messages::{InboundCommand, InboundEnvelope, TopicSet, COMMAND_ON, STATUS_CONFIRMED};
use crate::mqtt::publisher::TelemetryPublisher;
use crate::mqtt::sink::MessageSink;
use crate::store::MeasurementStore;

pub struct MessageRouter<P: PumpSwitch, K: MessageSink> {
    identity: DeviceIdentity,
    topics: TopicSet,
    store: MeasurementStore,
    pump: P,
    publisher: TelemetryPublisher<K>,
}

/// Reduces a decoded envelope to an actionable command, or `None` for
/// anything this device must ignore. The channel is broadcast-style:
/// traffic addressed elsewhere is normal and dropped without a sound.
fn classify(
    envelope: InboundEnvelope,
    topic: &str,
    topics: &TopicSet,
    device_id: &str,
) -> Option<InboundCommand> {
    let target = envelope.device_id.as_deref()?;
    if target != device_id {
        return None;
    }

    if topic == topics.auth {
        if envelope.status.as_deref() == Some(STATUS_CONFIRMED) {
            return Some(InboundCommand::Authorization {
                configured: envelope.configured.unwrap_or(false),
            });
        }
        None
    } else if topics.is_control(topic) {
        let verb = envelope.command?;
        Some(InboundCommand::Control {
            run: verb == COMMAND_ON,
        })
    } else {
        None
    }
}

impl<P: PumpSwitch, K: MessageSink> MessageRouter<P, K> {
    pub fn new(
        identity: DeviceIdentity,
        topics: TopicSet,
        store: MeasurementStore,
        pump: P,
        publisher: TelemetryPublisher<K>,
    ) -> Self {
        Self {
            identity,
            topics,
            store,
            pump,
            publisher,
        }
    }

    /// Handles one inbound message. Never fails: malformed or foreign
    /// traffic is dropped, handler-level trouble is logged.
    pub async fn dispatch(&mut self, topic: &str, payload: &[u8]) {
        let envelope: InboundEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                warn!(%topic, %error, "dropping undecodable message");
                return;
            }
        };

        let Some(command) = classify(envelope, topic, &self.topics, self.identity.as_str())
        else {
            return;
        };

        match command {
            InboundCommand::Authorization { configured } => {
                self.adopt_configuration(configured).await;
            }
            InboundCommand::Control { run } => self.apply_control(run).await,
        }
    }

    async fn adopt_configuration(&self, configured: bool) {
        match self
            .store
            .write(move |state| state.device_configured = configured)
            .await
        {
            Ok(()) => info!(configured, "authorization confirmed"),
            Err(error) => warn!(%error, "store busy, authorization confirmation dropped"),
        }
    }

    /// Applies a control verb. An accepted edge transition drives the
    /// relay and produces exactly one status message plus one forced
    /// level message; a command matching the current state is a no-op.
    async fn apply_control(&mut self, run: bool) {
        let changed = match self
            .store
            .write(move |state| {
                if state.pump_running == run {
                    false
                } else {
                    state.pump_running = run;
                    true
                }
            })
            .await
        {
            Ok(changed) => changed,
            Err(error) => {
                warn!(%error, "store busy, control command dropped");
                return;
            }
        };

        if !changed {
            debug!(run, "control command matches current state");
            return;
        }

        self.pump.set_running(run);
        if let Err(error) = self.publisher.publish_status().await {
            warn!(%error, "status report failed after pump edge");
        }
        if let Err(error) = self.publisher.publish_level(true).await {
            warn!(%error, "forced level report failed after pump edge");
        }
        info!(run, "pump state changed by remote command");
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::MockPump;
    use super::*;
    use crate::mqtt::sink::testing::RecordingSink;

    const DEVICE: &str = "PUMP_0A1B";

    fn router() -> (
        MessageRouter<MockPump, RecordingSink>,
        RecordingSink,
        MockPump,
        MeasurementStore,
    ) {
        let store = MeasurementStore::new(Duration::from_millis(100));
        let identity = DeviceIdentity::from_hex_source("0a1b").unwrap();
        let topics = TopicSet::new("mynode", identity.as_str());
        let sink = RecordingSink::connected();
        let pump = MockPump::default();
        let publisher =
            TelemetryPublisher::new(sink.clone(), store.clone(), identity.clone(), topics.clone(), 0.5);
        let router = MessageRouter::new(identity, topics, store.clone(), pump.clone(), publisher);
        (router, sink, pump, store)
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped() {
        let (mut router, sink, pump, _store) = router();
        router.dispatch("mynode/pump_control", b"not json").await;
        assert!(sink.sent().is_empty());
        assert!(pump.transitions().is_empty());
    }

    #[tokio::test]
    async fn missing_or_foreign_device_id_is_dropped() {
        let (mut router, sink, pump, store) = router();
        router
            .dispatch("mynode/pump_control", br#"{"command":"on"}"#)
            .await;
        router
            .dispatch(
                "mynode/pump_control",
                br#"{"device_id":"PUMP_FFFF","command":"on"}"#,
            )
            .await;

        assert!(sink.sent().is_empty());
        assert!(pump.transitions().is_empty());
        assert!(!store.read().await.unwrap().pump_running);
    }

    #[tokio::test]
    async fn control_edge_drives_pump_and_reports_once() {
        let (mut router, sink, pump, store) = router();
        router
            .dispatch(
                "mynode/pump_control",
                br#"{"device_id":"PUMP_0A1B","command":"on"}"#,
            )
            .await;

        assert!(store.read().await.unwrap().pump_running);
        assert_eq!(pump.transitions(), vec![true]);

        let status = sink.sent_to("mynode/pump_status");
        assert_eq!(status.len(), 1);
        assert!(status[0].contains(r#""is_running":true"#));
        // Forced level report goes out regardless of the threshold.
        assert_eq!(sink.sent_to("mynode/water_level").len(), 1);
    }

    #[tokio::test]
    async fn repeated_command_is_idempotent() {
        let (mut router, sink, pump, _store) = router();
        let payload = br#"{"device_id":"PUMP_0A1B","command":"on"}"#;
        router.dispatch("mynode/pump_control", payload).await;
        router.dispatch("mynode/pump_control", payload).await;

        assert_eq!(pump.transitions(), vec![true]);
        assert_eq!(sink.sent_to("mynode/pump_status").len(), 1);
        assert_eq!(sink.sent_to("mynode/water_level").len(), 1);
    }

    #[tokio::test]
    async fn off_command_on_targeted_topic() {
        let (mut router, sink, pump, store) = router();
        store.write(|state| state.pump_running = true).await.unwrap();

        router
            .dispatch(
                "mynode/PUMP_0A1B/control",
                br#"{"device_id":"PUMP_0A1B","command":"off"}"#,
            )
            .await;

        assert!(!store.read().await.unwrap().pump_running);
        assert_eq!(pump.transitions(), vec![false]);
        assert_eq!(sink.sent_to("mynode/pump_status").len(), 1);
    }

    #[tokio::test]
    async fn auth_confirmation_adopts_configured_flag() {
        let (mut router, sink, _pump, store) = router();
        router
            .dispatch(
                "mynode/pump_auth",
                br#"{"device_id":"PUMP_0A1B","status":"confirmed","configured":true}"#,
            )
            .await;

        assert!(store.read().await.unwrap().device_configured);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn auth_with_other_status_is_ignored() {
        let (mut router, _sink, _pump, store) = router();
        router
            .dispatch(
                "mynode/pump_auth",
                br#"{"device_id":"PUMP_0A1B","status":"new"}"#,
            )
            .await;
        assert!(!store.read().await.unwrap().device_configured);
    }

    #[test]
    fn classify_handles_the_command_grammar() {
        let topics = TopicSet::new("mynode", DEVICE);
        let envelope = |json: &str| serde_json::from_str::<InboundEnvelope>(json).unwrap();

        assert_eq!(
            classify(
                envelope(r#"{"device_id":"PUMP_0A1B","command":"on"}"#),
                "mynode/pump_control",
                &topics,
                DEVICE,
            ),
            Some(InboundCommand::Control { run: true })
        );
        // Any verb other than "on" acts as off.
        assert_eq!(
            classify(
                envelope(r#"{"device_id":"PUMP_0A1B","command":"standby"}"#),
                "mynode/pump_control",
                &topics,
                DEVICE,
            ),
            Some(InboundCommand::Control { run: false })
        );
        // Control schema on an unrelated topic is not a command.
        assert_eq!(
            classify(
                envelope(r#"{"device_id":"PUMP_0A1B","command":"on"}"#),
                "mynode/water_level",
                &topics,
                DEVICE,
            ),
            None
        );
    }
}
