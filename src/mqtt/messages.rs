//! Wire schemas and topic addressing.
//!
//! All payloads are UTF-8 JSON. Field names are part of the external
//! contract and must not change.

use serde::{Deserialize, Serialize};

pub const STATUS_NEW: &str = "new";
pub const STATUS_CONFIRMED: &str = "confirmed";
pub const COMMAND_ON: &str = "on";
pub const COMMAND_OFF: &str = "off";

/// Device → controller: request authorization after (re)connecting.
#[derive(Debug, Serialize)]
pub struct AuthRequest<'a> {
    pub device_id: &'a str,
    pub status: &'a str,
}

/// Device → controller: tank level report.
#[derive(Debug, Serialize)]
pub struct LevelReport<'a> {
    pub device_id: &'a str,
    pub water_level: f32,
    pub is_running: bool,
}

/// Device → controller: pump status report.
#[derive(Debug, Serialize)]
pub struct StatusReport<'a> {
    pub device_id: &'a str,
    pub status: &'a str,
    pub is_running: bool,
}

/// Inbound payload as it appears on the wire. The channel is shared, so
/// every field is optional until classification proves otherwise.
#[derive(Debug, Default, Deserialize)]
pub struct InboundEnvelope {
    pub device_id: Option<String>,
    pub status: Option<String>,
    pub configured: Option<bool>,
    pub command: Option<String>,
}

/// A decoded, validated inbound message. Constructed once per payload,
/// consumed once by the router, never queued or replayed.
#[derive(Debug, PartialEq, Eq)]
pub enum InboundCommand {
    /// Authorization decision carrying the confirmed configuration flag.
    Authorization { configured: bool },
    /// Control verb, already reduced to the requested pump state.
    Control { run: bool },
}

/// The fixed topic family this device speaks, all under one prefix.
#[derive(Clone, Debug)]
pub struct TopicSet {
    pub auth: String,
    pub control: String,
    pub device_control: String,
    pub level: String,
    pub status: String,
}

impl TopicSet {
    pub fn new(prefix: &str, device_id: &str) -> Self {
        Self {
            auth: format!("{prefix}/pump_auth"),
            control: format!("{prefix}/pump_control"),
            device_control: format!("{prefix}/{device_id}/control"),
            level: format!("{prefix}/water_level"),
            status: format!("{prefix}/pump_status"),
        }
    }

    /// Control messages arrive on the broadcast topic or on this
    /// device's targeted variant; both carry the same schema.
    pub fn is_control(&self, topic: &str) -> bool {
        topic == self.control || topic == self.device_control
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_set_matches_wire_contract() {
        let topics = TopicSet::new("mynode", "PUMP_0A1B");
        assert_eq!(topics.auth, "mynode/pump_auth");
        assert_eq!(topics.control, "mynode/pump_control");
        assert_eq!(topics.device_control, "mynode/PUMP_0A1B/control");
        assert_eq!(topics.level, "mynode/water_level");
        assert_eq!(topics.status, "mynode/pump_status");
    }

    #[test]
    fn control_matching_is_exact_or_per_device() {
        let topics = TopicSet::new("mynode", "PUMP_0A1B");
        assert!(topics.is_control("mynode/pump_control"));
        assert!(topics.is_control("mynode/PUMP_0A1B/control"));
        assert!(!topics.is_control("mynode/PUMP_FFFF/control"));
        assert!(!topics.is_control("mynode/pump_auth"));
    }

    #[test]
    fn outbound_schemas_serialize_expected_fields() {
        let level = serde_json::to_value(LevelReport {
            device_id: "PUMP_0A1B",
            water_level: 42.5,
            is_running: true,
        })
        .unwrap();
        assert_eq!(level["device_id"], "PUMP_0A1B");
        assert_eq!(level["water_level"], 42.5);
        assert_eq!(level["is_running"], true);

        let status = serde_json::to_value(StatusReport {
            device_id: "PUMP_0A1B",
            status: COMMAND_OFF,
            is_running: false,
        })
        .unwrap();
        assert_eq!(status["status"], "off");

        let auth = serde_json::to_value(AuthRequest {
            device_id: "PUMP_0A1B",
            status: STATUS_NEW,
        })
        .unwrap();
        assert_eq!(auth["status"], "new");
    }

    #[test]
    fn envelope_tolerates_missing_and_unknown_fields() {
        let envelope: InboundEnvelope =
            serde_json::from_str(r#"{"device_id":"PUMP_0A1B","extra":1}"#).unwrap();
        assert_eq!(envelope.device_id.as_deref(), Some("PUMP_0A1B"));
        assert!(envelope.status.is_none());
        assert!(envelope.command.is_none());

        let empty: InboundEnvelope = serde_json::from_str("{}").unwrap();
        assert!(empty.device_id.is_none());
    }
}
