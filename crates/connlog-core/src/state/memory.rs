// # Memory State Store
//
// In-memory implementation of StateStore and EpisodeStore.
//
// ## Crash Behavior
//
// - All state is lost on restart/crash
// - The first event per entity after a restart counts as a change and
//   appends a history point
// - Open offline episodes are forgotten; the next offline event opens a
//   new one
//
// ## When to Use
//
// - Testing environments
// - Embedding the reconciler where durability lives elsewhere

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::event::EntityKind;
use crate::traits::state_store::{CurrentState, EpisodeStore, OfflineEpisode, StateStore};

/// In-memory state store implementation
///
/// Current states and episodes live in HashMaps protected by one RwLock.
/// Clones share the same underlying maps.
///
/// # Example
///
/// ```rust,no_run
/// use connlog_core::{EntityKind, MemoryStateStore, StateStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryStateStore::new();
///
///     let changed = store
///         .set_state(EntityKind::Device, "dev-1", true, chrono::Utc::now())
///         .await?;
///     assert!(changed);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryStateStore {
    inner: Arc<RwLock<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    states: HashMap<(EntityKind, String), CurrentState>,
    episodes: HashMap<String, OfflineEpisode>,
}

impl MemoryStateStore {
    /// Create a new empty memory state store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of current-state records across both kinds
    pub async fn len(&self) -> usize {
        self.inner.read().await.states.len()
    }

    /// Check if the store holds no current-state records
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.states.is_empty()
    }

    /// Number of open offline episodes
    pub async fn episode_count(&self) -> usize {
        self.inner.read().await.episodes.len()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn set_state(
        &self,
        kind: EntityKind,
        entity_id: &str,
        online: bool,
        time: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut guard = self.inner.write().await;
        let key = (kind, entity_id.to_string());

        if guard.states.get(&key).is_some_and(|s| s.online == online) {
            return Ok(false);
        }

        guard.states.insert(
            key,
            CurrentState {
                entity_id: entity_id.to_string(),
                entity_kind: kind,
                online,
                last_updated: time,
            },
        );
        Ok(true)
    }

    async fn get_state(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<CurrentState>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.states.get(&(kind, entity_id.to_string())).cloned())
    }

    async fn delete_state(&self, kind: EntityKind, entity_id: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.states.remove(&(kind, entity_id.to_string()));
        Ok(())
    }

    async fn list_states(&self, kind: EntityKind) -> Result<Vec<CurrentState>, Error> {
        let guard = self.inner.read().await;
        let mut states: Vec<CurrentState> = guard
            .states
            .values()
            .filter(|s| s.entity_kind == kind)
            .cloned()
            .collect();
        states.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(states)
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[async_trait]
impl EpisodeStore for MemoryStateStore {
    async fn get_episode(&self, device_id: &str) -> Result<Option<OfflineEpisode>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.episodes.get(device_id).cloned())
    }

    async fn put_episode(&self, episode: &OfflineEpisode) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard
            .episodes
            .insert(episode.device_id.clone(), episode.clone());
        Ok(())
    }

    async fn delete_episode(&self, device_id: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.episodes.remove(device_id);
        Ok(())
    }
}
