//! Device-authorization handshake.
//!
//! Before the controller is trusted with pump commands it announces
//! itself and waits for the backend to confirm. The request side lives
//! here; the confirmation arrives through the router. Requests are
//! throttled: no matter how often a (re)connection gives us the
//! opportunity, at most one request leaves per wait window.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::mqtt::publisher::TelemetryPublisher;
use crate::mqtt::sink::MessageSink;
use crate::store::MeasurementStore;

pub struct AuthHandshake {
    store: MeasurementStore,
    wait_window: Duration,
    config_requested: bool,
    last_request: Option<Instant>,
}

impl AuthHandshake {
    pub fn new(store: MeasurementStore, wait_window: Duration) -> Self {
        Self {
            store,
            wait_window,
            config_requested: false,
            last_request: None,
        }
    }

    /// Sends an authorization request unless the device is already
    /// configured or a request is still within its wait window. The
    /// outstanding flag is set only after the publish is confirmed, so a
    /// send that never left does not consume the window.
    pub async fn request_authorization<K: MessageSink>(
        &mut self,
        publisher: &TelemetryPublisher<K>,
    ) {
        match self.store.read().await {
            Ok(state) if state.device_configured => return,
            Ok(_) => {}
            Err(error) => {
                warn!(%error, "store busy, authorization check skipped");
                return;
            }
        }

        if self.config_requested {
            if let Some(at) = self.last_request {
                if at.elapsed() <= self.wait_window {
                    debug!("authorization request still outstanding, not resending");
                    return;
                }
            }
        }

        match publisher.publish_auth_request().await {
            Ok(()) => {
                self.config_requested = true;
                self.last_request = Some(Instant::now());
                info!("authorization requested");
            }
            Err(error) => warn!(%error, "authorization request failed"),
        }
    }
}
