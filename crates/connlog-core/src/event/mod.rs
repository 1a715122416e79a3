// # Event Model
//
// Inbound payloads and the normalised connectivity event the reconciler
// works on.
//
// ## Wire types
//
// - [`DeviceLog`]: device connected/disconnected, optionally carrying an
//   offline-notification threshold, owner and display name
// - [`HubLog`]: hub connected/disconnected
// - [`DeviceCommand`] / [`HubCommand`]: lifecycle commands; only `"DELETE"`
//   has an effect
//
// Wire types keep optional fields as they arrive. Conversion into
// [`ConnectivityEvent`] drops empty strings and parses the threshold.

pub mod duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Command string that removes an entity's state
pub const DELETE_COMMAND: &str = "DELETE";

/// Kind of entity a connectivity event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// End device
    Device,
    /// Gateway hub
    Hub,
}

impl EntityKind {
    /// Lowercase name used in logs and store keys
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Device => "device",
            EntityKind::Hub => "hub",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device connectivity log as published on the device log topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLog {
    /// Device id
    pub id: String,
    /// Whether the device is online
    pub connected: bool,
    /// When the transition happened
    pub time: DateTime<Utc>,
    /// Offline threshold as a duration string (e.g. "5m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_connection_state: Option<String>,
    /// User to notify
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_owner: Option<String>,
    /// Human-readable device name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

impl DeviceLog {
    /// Normalise into a [`ConnectivityEvent`]
    ///
    /// An unparsable threshold disables monitoring for this event instead
    /// of rejecting it.
    pub fn into_event(self) -> ConnectivityEvent {
        let monitor_threshold = non_empty(self.monitor_connection_state).and_then(|raw| {
            match duration::parse_duration(&raw) {
                Ok(threshold) => Some(threshold),
                Err(e) => {
                    tracing::warn!(
                        entity_id = %self.id,
                        threshold = %raw,
                        "Ignoring invalid offline threshold: {}",
                        e
                    );
                    None
                }
            }
        });

        ConnectivityEvent {
            entity_id: self.id,
            entity_kind: EntityKind::Device,
            connected: self.connected,
            time: self.time,
            monitor_threshold,
            owner_id: non_empty(self.device_owner),
            display_name: non_empty(self.device_name),
        }
    }
}

impl From<DeviceLog> for ConnectivityEvent {
    fn from(log: DeviceLog) -> Self {
        log.into_event()
    }
}

/// Hub connectivity log as published on the hub log topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubLog {
    /// Hub id
    pub id: String,
    /// Whether the hub is online
    pub connected: bool,
    /// When the transition happened
    pub time: DateTime<Utc>,
}

impl From<HubLog> for ConnectivityEvent {
    fn from(log: HubLog) -> Self {
        ConnectivityEvent {
            entity_id: log.id,
            entity_kind: EntityKind::Hub,
            connected: log.connected,
            time: log.time,
            monitor_threshold: None,
            owner_id: None,
            display_name: None,
        }
    }
}

/// Lifecycle command for a device or hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCommand {
    /// Command verb
    pub command: String,
    /// Target entity id
    pub id: String,
    /// Owner of the entity
    #[serde(default)]
    pub owner: String,
}

impl EntityCommand {
    /// Whether this command removes the entity
    pub fn is_delete(&self) -> bool {
        self.command == DELETE_COMMAND
    }
}

/// Command published on the device command topic
pub type DeviceCommand = EntityCommand;

/// Command published on the hub command topic
pub type HubCommand = EntityCommand;

/// Normalised connectivity transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityEvent {
    pub entity_id: String,
    pub entity_kind: EntityKind,
    pub connected: bool,
    pub time: DateTime<Utc>,
    /// Offline duration after which the owner is notified
    pub monitor_threshold: Option<Duration>,
    pub owner_id: Option<String>,
    pub display_name: Option<String>,
}

impl ConnectivityEvent {
    /// Threshold and owner, when offline notifications apply to this event
    pub fn monitoring(&self) -> Option<(Duration, &str)> {
        Some((self.monitor_threshold?, self.owner_id.as_deref()?))
    }
}

/// Decode a JSON payload into one of the wire types
///
/// Any failure is reported as [`Error::Decode`].
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| Error::decode(e.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
