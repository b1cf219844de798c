//! Telemetry publisher.
//!
//! Converts store state into outbound reports. Level reports are gated by
//! a change-detection threshold unless forced; status reports always go
//! out. The ordering inside [`TelemetryPublisher::publish_level`] is
//! load-bearing: the debounce baseline advances only after the sink
//! confirms the send, so a failed publish leaves the delta armed for the
//! next attempt.

use tracing::{debug, warn};

use crate::identity::DeviceIdentity;
use crate::mqtt::messages::{AuthRequest, LevelReport, StatusReport, TopicSet};
use crate::mqtt::messages::{COMMAND_OFF, COMMAND_ON, STATUS_NEW};
use crate::mqtt::sink::{MessageSink, PublishError};
use crate::store::MeasurementStore;

#[derive(Clone)]
pub struct TelemetryPublisher<K: MessageSink> {
    sink: K,
    store: MeasurementStore,
    identity: DeviceIdentity,
    topics: TopicSet,
    /// Minimum level change (cm) worth re-reporting.
    threshold: f32,
}

impl<K: MessageSink> TelemetryPublisher<K> {
    pub fn new(
        sink: K,
        store: MeasurementStore,
        identity: DeviceIdentity,
        topics: TopicSet,
        threshold: f32,
    ) -> Self {
        Self {
            sink,
            store,
            identity,
            topics,
            threshold,
        }
    }

    pub(crate) fn store(&self) -> &MeasurementStore {
        &self.store
    }

    pub(crate) fn topics(&self) -> &TopicSet {
        &self.topics
    }

    /// Publishes a level report if it is worth sending.
    ///
    /// No-op while offline. Without `force`, deltas below the threshold
    /// are swallowed. On confirmed send the baseline advances to the
    /// snapshot that was reported — not to whatever the store holds
    /// afterwards.
    pub async fn publish_level(&self, force: bool) -> Result<(), PublishError> {
        if !self.sink.is_connected() {
            return Ok(());
        }
        let state = match self.store.read().await {
            Ok(state) => state,
            Err(error) => {
                warn!(%error, "store busy, level report skipped");
                return Ok(());
            }
        };
        if !force && (state.current_distance - state.last_reported_distance).abs() < self.threshold
        {
            return Ok(());
        }

        let report = LevelReport {
            device_id: self.identity.as_str(),
            water_level: state.current_distance,
            is_running: state.pump_running,
        };
        self.sink
            .publish(&self.topics.level, serde_json::to_vec(&report)?)
            .await?;

        let reported = state.current_distance;
        if let Err(error) = self
            .store
            .write(move |state| state.last_reported_distance = reported)
            .await
        {
            warn!(%error, "store busy, debounce baseline not advanced");
        }
        debug!(water_level = reported, "level report published");
        Ok(())
    }

    /// Publishes the pump status unconditionally. Status edges are rare
    /// and operationally important, so there is no debounce here.
    pub async fn publish_status(&self) -> Result<(), PublishError> {
        if !self.sink.is_connected() {
            return Ok(());
        }
        let state = match self.store.read().await {
            Ok(state) => state,
            Err(error) => {
                warn!(%error, "store busy, status report skipped");
                return Ok(());
            }
        };

        let report = StatusReport {
            device_id: self.identity.as_str(),
            status: if state.pump_running { COMMAND_ON } else { COMMAND_OFF },
            is_running: state.pump_running,
        };
        self.sink
            .publish(&self.topics.status, serde_json::to_vec(&report)?)
            .await?;
        debug!(is_running = state.pump_running, "status report published");
        Ok(())
    }

    /// Publishes an authorization request. Unlike the reports above this
    /// propagates the offline case as an error, because the handshake
    /// must not mark a request as outstanding unless it actually left.
    pub async fn publish_auth_request(&self) -> Result<(), PublishError> {
        let request = AuthRequest {
            device_id: self.identity.as_str(),
            status: STATUS_NEW,
        };
        self.sink
            .publish(&self.topics.auth, serde_json::to_vec(&request)?)
            .await
    }
}
