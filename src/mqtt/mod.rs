//! # MQTT Integration Module
//!
//! Everything that touches the broker lives here, split by concern:
//!
//! ```text
//! mqtt/
//! ├── messages.rs   - wire schemas, topic set, inbound classification
//! ├── sink.rs       - publish seam over the rumqttc client
//! ├── publisher.rs  - change-gated level reports, unconditional status
//! ├── handshake.rs  - throttled device-authorization requests
//! ├── router.rs     - explicit (topic, payload) → handler dispatch
//! └── connection.rs - session lifecycle and the event-servicing loop
//! ```
//!
//! The connection manager owns the session; the router and handshake are
//! only ever reached from its loop. The publisher is the sole writer of
//! the debounce baseline and is shared with the sampling task.

pub mod connection;
pub mod handshake;
pub mod messages;
pub mod publisher;
pub mod router;
pub mod sink;
