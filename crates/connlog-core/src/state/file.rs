// # File State Store
//
// File-based implementation of StateStore and EpisodeStore with crash
// recovery.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "devices": {
//     "dev-1": { "entity_id": "dev-1", "entity_kind": "device",
//                "online": false, "last_updated": "2025-01-09T12:00:00Z" }
//   },
//   "hubs": {},
//   "episodes": {
//     "dev-1": { "device_id": "dev-1",
//                "offline_since": "2025-01-09T12:00:00Z", "notified": false }
//   }
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::event::EntityKind;
use crate::traits::state_store::{CurrentState, EpisodeStore, OfflineEpisode, StateStore};

/// State file format version
const STATE_FILE_VERSION: &str = "1.0";

/// File-based state store with crash recovery
///
/// Every mutation is written through to disk while the write lock is held,
/// so file writes never interleave and a successful return means the
/// change is durable.
///
/// Each write serializes the whole document and fsyncs it, so the cost
/// grows with the number of tracked entities. Suited to small deployments.
///
/// # Example
///
/// ```rust,no_run
/// use connlog_core::{EntityKind, FileStateStore, StateStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileStateStore::new("/var/lib/connlog/state.json").await?;
///
///     store
///         .set_state(EntityKind::Hub, "hub-1", true, chrono::Utc::now())
///         .await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    state: RwLock<FileState>,
}

/// Serializable state file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FileState {
    version: String,
    #[serde(default)]
    devices: HashMap<String, CurrentState>,
    #[serde(default)]
    hubs: HashMap<String, CurrentState>,
    #[serde(default)]
    episodes: HashMap<String, OfflineEpisode>,
}

impl FileState {
    fn empty() -> Self {
        Self {
            version: STATE_FILE_VERSION.to_string(),
            ..Self::default()
        }
    }

    fn states(&self, kind: EntityKind) -> &HashMap<String, CurrentState> {
        match kind {
            EntityKind::Device => &self.devices,
            EntityKind::Hub => &self.hubs,
        }
    }

    fn states_mut(&mut self, kind: EntityKind) -> &mut HashMap<String, CurrentState> {
        match kind {
            EntityKind::Device => &mut self.devices,
            EntityKind::Hub => &mut self.hubs,
        }
    }

    fn record_count(&self) -> usize {
        self.devices.len() + self.hubs.len()
    }
}

impl FileStateStore {
    /// Create or load a file state store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Try to load the existing state file
    /// 3. If it is corrupted, load the backup instead
    /// 4. If both fail, start with empty state
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create state directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let state = Self::load_state_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// Path of the main state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_state_with_recovery(path: &Path) -> Result<FileState, Error> {
        let err = match Self::load_state(path).await {
            Ok(state) => {
                tracing::debug!(
                    records = state.record_count(),
                    episodes = state.episodes.len(),
                    "Loaded state from {}",
                    path.display()
                );
                return Ok(state);
            }
            Err(Error::Json(e)) => e,
            Err(e) => return Err(e),
        };

        tracing::warn!(
            "State file appears corrupted: {}. Attempting recovery from backup.",
            err
        );

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No backup file found. Starting with empty state.");
            return Ok(FileState::empty());
        }

        match Self::load_state(&backup_path).await {
            Ok(state) => {
                tracing::info!(
                    records = state.record_count(),
                    "Recovered state from backup"
                );
                if let Err(restore_err) = fs::copy(&backup_path, path).await {
                    tracing::error!("Failed to restore state file from backup: {}", restore_err);
                }
                Ok(state)
            }
            Err(backup_err) => {
                tracing::error!(
                    "Backup also unreadable: {}. Starting with empty state.",
                    backup_err
                );
                Ok(FileState::empty())
            }
        }
    }

    async fn load_state(path: &Path) -> Result<FileState, Error> {
        if !path.exists() {
            tracing::debug!("State file does not exist: {}", path.display());
            return Ok(FileState::empty());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to read state file {}: {}",
                path.display(),
                e
            ))
        })?;

        let state: FileState = serde_json::from_str(&content)?;

        if state.version != STATE_FILE_VERSION {
            tracing::warn!(
                "State file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STATE_FILE_VERSION,
                state.version
            );
        }

        Ok(state)
    }

    /// Write `state` to disk atomically
    ///
    /// Callers hold the write lock for the duration.
    async fn persist(&self, state: &FileState) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| Error::state_store(format!("Failed to serialize state: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.sync_all().await.map_err(|e| {
                Error::state_store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::state_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("State written to {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn set_state(
        &self,
        kind: EntityKind,
        entity_id: &str,
        online: bool,
        time: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut guard = self.state.write().await;

        if guard
            .states(kind)
            .get(entity_id)
            .is_some_and(|s| s.online == online)
        {
            return Ok(false);
        }

        let previous = guard.states_mut(kind).insert(
            entity_id.to_string(),
            CurrentState {
                entity_id: entity_id.to_string(),
                entity_kind: kind,
                online,
                last_updated: time,
            },
        );

        if let Err(e) = self.persist(&guard).await {
            // Roll back so a redelivered event is still seen as a change
            let states = guard.states_mut(kind);
            match previous {
                Some(previous) => {
                    states.insert(entity_id.to_string(), previous);
                }
                None => {
                    states.remove(entity_id);
                }
            }
            return Err(e);
        }

        Ok(true)
    }

    async fn get_state(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<CurrentState>, Error> {
        let guard = self.state.read().await;
        Ok(guard.states(kind).get(entity_id).cloned())
    }

    async fn delete_state(&self, kind: EntityKind, entity_id: &str) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        let Some(removed) = guard.states_mut(kind).remove(entity_id) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&guard).await {
            // Keep the record so a redelivered delete writes again
            guard.states_mut(kind).insert(entity_id.to_string(), removed);
            return Err(e);
        }
        Ok(())
    }

    async fn list_states(&self, kind: EntityKind) -> Result<Vec<CurrentState>, Error> {
        let guard = self.state.read().await;
        let mut states: Vec<CurrentState> = guard.states(kind).values().cloned().collect();
        states.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(states)
    }

    async fn flush(&self) -> Result<(), Error> {
        let guard = self.state.write().await;
        self.persist(&guard).await
    }
}

#[async_trait]
impl EpisodeStore for FileStateStore {
    async fn get_episode(&self, device_id: &str) -> Result<Option<OfflineEpisode>, Error> {
        let guard = self.state.read().await;
        Ok(guard.episodes.get(device_id).cloned())
    }

    async fn put_episode(&self, episode: &OfflineEpisode) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        let previous = guard
            .episodes
            .insert(episode.device_id.clone(), episode.clone());
        if let Err(e) = self.persist(&guard).await {
            match previous {
                Some(previous) => {
                    guard.episodes.insert(episode.device_id.clone(), previous);
                }
                None => {
                    guard.episodes.remove(&episode.device_id);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    async fn delete_episode(&self, device_id: &str) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        let Some(removed) = guard.episodes.remove(device_id) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&guard).await {
            guard.episodes.insert(device_id.to_string(), removed);
            return Err(e);
        }
        Ok(())
    }
}
