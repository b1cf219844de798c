//! Publish seam.
//!
//! A minimal trait decouples the telemetry logic from the client crate,
//! which keeps the debounce/baseline semantics testable without a broker.

use std::future::Future;

use rumqttc::{AsyncClient, QoS};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transport is not connected")]
    NotConnected,
    #[error("mqtt client rejected publish: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("payload serialization failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outbound message seam. `publish` resolving `Ok` is the system's
/// confirmed-send signal; callers gate state updates on it. The future
/// is required to be `Send` so publishers can live inside spawned tasks.
pub trait MessageSink: Clone + Send + Sync {
    fn is_connected(&self) -> bool;
    fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Production sink: a rumqttc client handle plus the connectivity flag
/// maintained by the connection manager.
#[derive(Clone)]
pub struct RumqttcSink {
    client: AsyncClient,
    link: watch::Receiver<bool>,
}

impl RumqttcSink {
    pub fn new(client: AsyncClient, link: watch::Receiver<bool>) -> Self {
        Self { client, link }
    }
}

impl MessageSink for RumqttcSink {
    fn is_connected(&self) -> bool {
        *self.link.borrow()
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::{MessageSink, PublishError};

    /// Test double that records every accepted publish and can be flipped
    /// offline or into a failure mode.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        connected: Arc<AtomicBool>,
        fail_publishes: Arc<AtomicBool>,
        sent: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl RecordingSink {
        pub(crate) fn connected() -> Self {
            let sink = Self::default();
            sink.set_connected(true);
            sink
        }

        pub(crate) fn set_connected(&self, connected: bool) {
            self.connected.store(connected, Ordering::SeqCst);
        }

        pub(crate) fn set_failing(&self, failing: bool) {
            self.fail_publishes.store(failing, Ordering::SeqCst);
        }

        pub(crate) fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }

        pub(crate) fn sent_to(&self, topic: &str) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| t == topic)
                .map(|(_, payload)| payload.clone())
                .collect()
        }
    }

    impl MessageSink for RecordingSink {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
            if !self.is_connected() || self.fail_publishes.load(Ordering::SeqCst) {
                return Err(PublishError::NotConnected);
            }
            self.sent
                .lock()
                .unwrap()
                .push((topic.to_string(), String::from_utf8(payload).unwrap()));
            Ok(())
        }
    }
}
