//! Device identity derivation.
//!
//! Every message the controller sends or acts on carries a device id, and
//! the same id is used as the MQTT client identifier. The id is derived
//! once at boot from a hardware-unique source and never changes at
//! runtime.

use std::fmt;
use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

const IDENTITY_PREFIX: &str = "PUMP_";
const SUFFIX_LEN: usize = 4;

const MACHINE_ID_PATH: &str = "/etc/machine-id";
const NET_CLASS_PATH: &str = "/sys/class/net";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no hardware identifier available (machine-id and NIC MAC both missing)")]
    NoHardwareId,
}

/// Stable addressing key for this device: `PUMP_` plus four uppercase hex
/// digits taken from a hardware-unique identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Derives the identity from `/etc/machine-id`, falling back to the
    /// first non-loopback NIC MAC address.
    pub fn detect() -> Result<Self, IdentityError> {
        if let Ok(raw) = fs::read_to_string(MACHINE_ID_PATH) {
            if let Some(id) = Self::from_hex_source(&raw) {
                debug!(source = MACHINE_ID_PATH, id = %id, "device identity derived");
                return Ok(id);
            }
        }

        if let Some(id) = Self::from_first_nic(Path::new(NET_CLASS_PATH)) {
            debug!(source = NET_CLASS_PATH, id = %id, "device identity derived");
            return Ok(id);
        }

        Err(IdentityError::NoHardwareId)
    }

    /// Builds an identity from any string containing at least four hex
    /// digits; the last four become the suffix.
    pub(crate) fn from_hex_source(raw: &str) -> Option<Self> {
        let hex: String = raw.chars().filter(|c| c.is_ascii_hexdigit()).collect();
        if hex.len() < SUFFIX_LEN {
            return None;
        }
        let suffix = hex[hex.len() - SUFFIX_LEN..].to_ascii_uppercase();
        Some(Self(format!("{IDENTITY_PREFIX}{suffix}")))
    }

    fn from_first_nic(net_class: &Path) -> Option<Self> {
        let entries = fs::read_dir(net_class).ok()?;
        for entry in entries.flatten() {
            if entry.file_name() == "lo" {
                continue;
            }
            if let Ok(address) = fs::read_to_string(entry.path().join("address")) {
                if let Some(id) = Self::from_hex_source(&address) {
                    return Some(id);
                }
            }
        }
        None
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
