//! Shared measurement store.
//!
//! The one object that crosses task boundaries: the sampling task and the
//! message router both read and mutate the measurement record, arbitrated
//! exclusively through this accessor. Acquisition is always bounded-wait —
//! a caller that cannot take the lock within the timeout skips its
//! operation for the cycle instead of blocking, so a wedged holder can
//! never cascade into a second stalled task. That stall is the watchdog's
//! job to notice, via heartbeats, not ours.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Snapshot of everything the tank controller knows about the world.
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementState {
    /// Latest sampled distance in cm, always within `[0, tank_height]`.
    pub current_distance: f32,
    /// Distance carried by the last successfully published level report.
    /// Advances only after a confirmed publish, never speculatively.
    pub last_reported_distance: f32,
    pub pump_running: bool,
    pub device_configured: bool,
}

impl Default for MeasurementState {
    fn default() -> Self {
        Self {
            current_distance: 0.0,
            last_reported_distance: 0.0,
            pump_running: false,
            device_configured: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("measurement store lock not acquired within {0:?}")]
    LockTimeout(Duration),
}

/// Mutex-guarded access to the shared [`MeasurementState`].
///
/// Cloning shares the underlying record. `read` returns a self-consistent
/// snapshot; `write` runs the mutator under the guard for the whole
/// read-modify-write, so readers never observe a partial update.
#[derive(Clone, Debug)]
pub struct MeasurementStore {
    inner: Arc<Mutex<MeasurementState>>,
    lock_timeout: Duration,
}

impl MeasurementStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MeasurementState::default())),
            lock_timeout,
        }
    }

    /// Takes a snapshot of the current state, waiting at most the
    /// configured lock timeout.
    pub async fn read(&self) -> Result<MeasurementState, StoreError> {
        match timeout(self.lock_timeout, self.inner.lock()).await {
            Ok(guard) => Ok(guard.clone()),
            Err(_) => Err(StoreError::LockTimeout(self.lock_timeout)),
        }
    }

    /// Applies `mutate` atomically under the lock and returns its result,
    /// waiting at most the configured lock timeout.
    pub async fn write<R>(
        &self,
        mutate: impl FnOnce(&mut MeasurementState) -> R,
    ) -> Result<R, StoreError> {
        match timeout(self.lock_timeout, self.inner.lock()).await {
            Ok(mut guard) => Ok(mutate(&mut guard)),
            Err(_) => Err(StoreError::LockTimeout(self.lock_timeout)),
        }
    }

    #[cfg(test)]
    pub(crate) async fn hold(&self) -> tokio::sync::MutexGuard<'_, MeasurementState> {
        self.inner.lock().await
    }
}
