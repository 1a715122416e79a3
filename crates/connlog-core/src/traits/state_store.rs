// # State Store Traits
//
// Defines the interfaces for durable current-state and offline-episode
// bookkeeping.
//
// ## Purpose
//
// The state store makes event processing idempotent:
// - `set_state` reports whether the stored online flag actually changed,
//   so replays of the same event never append duplicate history
// - Offline episodes remember when a device went offline and whether its
//   owner has already been told
//
// ## Implementations
//
// - Memory: `HashMap`s behind an async `RwLock`
// - File: JSON document with atomic replace and backup recovery
//
// ## Usage
//
// ```rust,ignore
// use connlog_core::{EntityKind, StateStore};
//
// let changed = store
//     .set_state(EntityKind::Device, "dev-1", false, event_time)
//     .await?;
// if changed {
//     history.append(&point).await?;
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EntityKind;

/// Current connectivity of one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentState {
    /// Entity id
    pub entity_id: String,
    /// Device or hub
    pub entity_kind: EntityKind,
    /// Whether the entity is online
    pub online: bool,
    /// Time of the event that last changed the state
    pub last_updated: DateTime<Utc>,
}

/// Open offline period of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineEpisode {
    /// Device id
    pub device_id: String,
    /// Time of the event that opened the episode
    pub offline_since: DateTime<Utc>,
    /// Whether the owner has been notified for this episode
    pub notified: bool,
}

impl OfflineEpisode {
    /// Start a fresh, un-notified episode
    pub fn open(device_id: impl Into<String>, offline_since: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            offline_since,
            notified: false,
        }
    }
}

/// Trait for current-state store implementations
///
/// Implementations must be thread-safe and usable across async tasks.
///
/// # Atomicity
///
/// `set_state` is a compare-and-upsert. Implementations perform the
/// comparison and the write under one lock (or one conditional write) so
/// two concurrent calls for the same key cannot both report a change for
/// the same transition.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Record the connectivity of an entity
    ///
    /// # Parameters
    ///
    /// - `kind`: Device or hub
    /// - `entity_id`: The entity id
    /// - `online`: The reported connectivity
    /// - `time`: Event time, stored as `last_updated` on change
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: No record existed or `online` differed; the record was written
    /// - `Ok(false)`: The stored state already matched; nothing was written
    /// - `Err(Error)`: Storage error
    async fn set_state(
        &self,
        kind: EntityKind,
        entity_id: &str,
        online: bool,
        time: DateTime<Utc>,
    ) -> Result<bool, crate::Error>;

    /// Get the current state of an entity
    ///
    /// # Returns
    ///
    /// - `Ok(Some(CurrentState))`: The stored state
    /// - `Ok(None)`: No record found
    /// - `Err(Error)`: Storage error
    async fn get_state(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<CurrentState>, crate::Error>;

    /// Delete the state of an entity
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Successfully deleted (or didn't exist)
    /// - `Err(Error)`: Storage error
    async fn delete_state(&self, kind: EntityKind, entity_id: &str) -> Result<(), crate::Error>;

    /// List all stored states of one kind, ordered by entity id
    async fn list_states(&self, kind: EntityKind) -> Result<Vec<CurrentState>, crate::Error>;

    /// Persist any pending changes
    ///
    /// Some implementations may buffer writes. This ensures
    /// all changes are flushed to persistent storage.
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Trait for offline-episode storage
///
/// Episodes are keyed by device id; at most one exists per device.
#[async_trait]
pub trait EpisodeStore: Send + Sync {
    /// Get the open episode of a device
    ///
    /// # Returns
    ///
    /// - `Ok(Some(OfflineEpisode))`: The device is in an open episode
    /// - `Ok(None)`: No episode open
    /// - `Err(Error)`: Storage error
    async fn get_episode(&self, device_id: &str) -> Result<Option<OfflineEpisode>, crate::Error>;

    /// Create or replace the episode of `episode.device_id`
    async fn put_episode(&self, episode: &OfflineEpisode) -> Result<(), crate::Error>;

    /// Remove the episode of a device
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Successfully deleted (or didn't exist)
    /// - `Err(Error)`: Storage error
    async fn delete_episode(&self, device_id: &str) -> Result<(), crate::Error>;
}
