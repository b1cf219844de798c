//! Ultrasonic sampling task.
//!
//! Fixed-period loop (default 1 Hz; a missed tick is delayed, not
//! bunched, so cycle-to-cycle jitter stays within one period). Each
//! cycle pings the sensor, converts the round trip to a clamped
//! distance, writes the store, and lets the publisher decide whether the
//! new value is worth reporting. An absent echo is not an error — the
//! previous distance stands, exactly.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::hal::DistanceSensor;
use crate::mqtt::publisher::TelemetryPublisher;
use crate::mqtt::sink::MessageSink;
use crate::store::MeasurementStore;
use crate::supervisor::Heartbeat;

/// Speed of sound in cm/µs; the echo covers the distance twice.
const SOUND_SPEED_CM_PER_US: f32 = 0.034;

#[derive(Clone, Debug)]
pub struct SamplerSettings {
    pub sample_period: Duration,
    /// Upper clamp for every computed distance, in cm.
    pub tank_height_cm: f32,
    /// Calibration offset added before clamping, in cm.
    pub sensor_offset_cm: f32,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            sample_period: Duration::from_secs(1),
            tank_height_cm: 100.0,
            sensor_offset_cm: 0.0,
        }
    }
}

pub struct SamplingTask<D: DistanceSensor, K: MessageSink> {
    sensor: D,
    store: MeasurementStore,
    publisher: TelemetryPublisher<K>,
    settings: SamplerSettings,
    heartbeat: Heartbeat,
}

impl<D: DistanceSensor, K: MessageSink> SamplingTask<D, K> {
    pub fn new(
        sensor: D,
        store: MeasurementStore,
        publisher: TelemetryPublisher<K>,
        settings: SamplerSettings,
        heartbeat: Heartbeat,
    ) -> Self {
        Self {
            sensor,
            store,
            publisher,
            settings,
            heartbeat,
        }
    }

    pub async fn run(mut self) {
        info!(period = ?self.settings.sample_period, "sampling task started");
        let mut ticker = interval(self.settings.sample_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.run_cycle().await {
                self.heartbeat.beat();
            }
        }
    }

    /// One sampling cycle. Returns whether the cycle completed; a cycle
    /// that could not reach the store does not count as liveness — if
    /// the store stays wedged, that is exactly what the watchdog should
    /// see.
    async fn run_cycle(&mut self) -> bool {
        match self.sensor.ping() {
            Ok(Some(round_trip)) => {
                let distance = self.distance_from(round_trip);
                if let Err(error) = self
                    .store
                    .write(move |state| state.current_distance = distance)
                    .await
                {
                    warn!(%error, "store busy, sample dropped");
                    return false;
                }
                debug!(distance_cm = distance, "distance sampled");
            }
            Ok(None) => debug!("echo timeout, keeping last distance"),
            Err(error) => warn!(%error, "sensor read failed, keeping last distance"),
        }

        if let Err(error) = self.publisher.publish_level(false).await {
            warn!(%error, "level report failed");
        }
        true
    }

    fn distance_from(&self, round_trip: Duration) -> f32 {
        let raw = round_trip.as_micros() as f32 * SOUND_SPEED_CM_PER_US / 2.0
            + self.settings.sensor_offset_cm;
        raw.clamp(0.0, self.settings.tank_height_cm)
    }
}
