//! Connectivity reconciler
//!
//! The Reconciler is responsible for:
//! - Pushing each event's connectivity to the device registry
//! - Recording current state with change detection
//! - Appending history only for actual transitions
//! - Feeding fresh device events to the offline tracker
//! - Deleting state on `DELETE` commands
//!
//! ## Architecture
//!
//! ```text
//!                    ConnectivityEvent
//!                           │
//!                           ▼
//!                   ┌──────────────┐
//!                   │  Reconciler  │
//!                   └──────────────┘
//!                           │
//!      ┌──────────────┬─────┴────────┬────────────────┐
//!      ▼              ▼              ▼                ▼
//! ┌──────────┐  ┌────────────┐  ┌─────────────┐  ┌────────────────┐
//! │ Registry │  │ StateStore │  │ HistorySink │  │ OfflineTracker │
//! │ (sync)   │  │ (set)      │  │ (if change) │  │ (devices only) │
//! └──────────┘  └────────────┘  └─────────────┘  └────────────────┘
//! ```
//!
//! ## Event Flow
//!
//! 1. Registry sync; a failure aborts the event
//! 2. Compare-and-upsert the current state; a failure aborts the event
//! 3. On change, append a history point; a failure is returned
//! 4. Devices only: if the event is within the freshness window, run the
//!    offline tracker; its failures are logged and swallowed
//!
//! Steps 2 and 3 are not transactional. If the append fails after the state
//! was written, the redelivered event no longer counts as a change and that
//! history point is lost.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ReconcilerConfig;
use crate::error::Result;
use crate::event::{ConnectivityEvent, DeviceCommand, DeviceLog, EntityCommand, EntityKind, HubCommand, HubLog};
use crate::tracker::{OfflineTracker, TrackerOutcome};
use crate::traits::{
    CurrentState, EpisodeStore, HistoryPoint, HistorySink, Notifier, RegistrySync, StateStore,
};

/// Events emitted by the Reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// Stored state changed (or was created)
    StateChanged {
        kind: EntityKind,
        entity_id: String,
        online: bool,
    },

    /// Stored state already matched the event
    StateUnchanged {
        kind: EntityKind,
        entity_id: String,
        online: bool,
    },

    /// History point appended
    HistoryAppended {
        kind: EntityKind,
        entity_id: String,
        online: bool,
    },

    /// Offline tracker evaluated a device event
    NotificationOutcome {
        entity_id: String,
        outcome: TrackerOutcome,
    },

    /// Device event too old for the offline tracker
    TrackerSkipped { entity_id: String },

    /// State removed by a `DELETE` command
    EntityDeleted { kind: EntityKind, entity_id: String },

    /// Command other than `DELETE` received
    CommandIgnored {
        kind: EntityKind,
        entity_id: String,
        command: String,
    },
}

/// Connectivity reconciler
///
/// Shared across ingestion loops as `Arc<Reconciler>`. It holds no locks of
/// its own; per-key atomicity comes from the state store.
pub struct Reconciler {
    state_store: Arc<dyn StateStore>,
    episodes: Arc<dyn EpisodeStore>,
    history: Arc<dyn HistorySink>,
    registry: Option<Arc<dyn RegistrySync>>,
    notifier: Option<Arc<dyn Notifier>>,
    tracker: Option<OfflineTracker>,
    clock: Arc<dyn Clock>,
    round_granularity: Duration,
    freshness_window: Duration,
    event_tx: mpsc::Sender<ReconcileEvent>,
}

impl Reconciler {
    /// Create a new reconciler
    ///
    /// Registry sync and offline notifications start disabled; switch them
    /// on with [`Reconciler::with_registry`] and [`Reconciler::with_notifier`].
    ///
    /// # Parameters
    ///
    /// - `state_store`: Current-state store
    /// - `episodes`: Offline-episode store
    /// - `history`: History sink
    /// - `config`: Reconciler configuration
    ///
    /// # Returns
    ///
    /// A tuple of (reconciler, event_receiver) where event_receiver yields reconcile events
    pub fn new(
        state_store: Arc<dyn StateStore>,
        episodes: Arc<dyn EpisodeStore>,
        history: Arc<dyn HistorySink>,
        config: &ReconcilerConfig,
    ) -> Result<(Self, mpsc::Receiver<ReconcileEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let reconciler = Self {
            state_store,
            episodes,
            history,
            registry: None,
            notifier: None,
            tracker: None,
            clock: Arc::new(SystemClock),
            round_granularity: config.round_granularity()?,
            freshness_window: config.freshness_window(),
            event_tx: tx,
        };

        Ok((reconciler, rx))
    }

    /// Sync every event to a device registry
    pub fn with_registry(mut self, registry: Arc<dyn RegistrySync>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Send offline notifications through `notifier`
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self.rebuild_tracker();
        self
    }

    /// Replace the wall clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self.rebuild_tracker();
        self
    }

    fn rebuild_tracker(&mut self) {
        self.tracker = self.notifier.clone().map(|notifier| {
            OfflineTracker::new(self.episodes.clone(), notifier, self.clock.clone())
                .with_round_granularity(self.round_granularity)
        });
    }

    /// Handle a device connectivity log
    pub async fn log_device(&self, log: DeviceLog) -> Result<()> {
        self.apply(log.into_event()).await
    }

    /// Handle a hub connectivity log
    pub async fn log_hub(&self, log: HubLog) -> Result<()> {
        self.apply(log.into()).await
    }

    /// Handle a device command
    pub async fn handle_device_command(&self, command: DeviceCommand) -> Result<()> {
        self.handle_command(EntityKind::Device, command).await
    }

    /// Handle a hub command
    pub async fn handle_hub_command(&self, command: HubCommand) -> Result<()> {
        self.handle_command(EntityKind::Hub, command).await
    }

    /// Current state of an entity
    pub async fn current_state(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<CurrentState>> {
        self.state_store.get_state(kind, entity_id).await
    }

    /// Persist buffered state; called once at shutdown
    pub async fn flush(&self) -> Result<()> {
        self.state_store.flush().await
    }

    /// Apply one connectivity event
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Event fully processed; safe to acknowledge
    /// - `Err(Error)`: Registry, state or history failure; the event should be redelivered
    pub async fn apply(&self, event: ConnectivityEvent) -> Result<()> {
        let kind = event.entity_kind;
        let id = event.entity_id.as_str();
        debug!(entity_id = %id, kind = %kind, connected = event.connected, time = %event.time, "Handling connectivity event");

        if let Some(registry) = &self.registry {
            match kind {
                EntityKind::Device => registry.sync_device_state(id, event.connected).await?,
                EntityKind::Hub => registry.sync_hub_state(id, event.connected).await?,
            }
        }

        let changed = self
            .state_store
            .set_state(kind, id, event.connected, event.time)
            .await?;

        if changed {
            info!(entity_id = %id, kind = %kind, online = event.connected, "Connectivity changed");
            self.emit_event(ReconcileEvent::StateChanged {
                kind,
                entity_id: id.to_string(),
                online: event.connected,
            });

            self.history
                .append(&HistoryPoint::new(kind, id, event.connected, event.time))
                .await?;
            self.emit_event(ReconcileEvent::HistoryAppended {
                kind,
                entity_id: id.to_string(),
                online: event.connected,
            });
        } else {
            debug!(entity_id = %id, kind = %kind, "Connectivity unchanged");
            self.emit_event(ReconcileEvent::StateUnchanged {
                kind,
                entity_id: id.to_string(),
                online: event.connected,
            });
        }

        if kind == EntityKind::Device {
            self.track_offline(&event).await;
        }

        Ok(())
    }

    async fn track_offline(&self, event: &ConnectivityEvent) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        let id = event.entity_id.as_str();

        if !self.is_fresh(event) {
            debug!(entity_id = %id, time = %event.time, "Event older than freshness window, skipping offline tracking");
            self.emit_event(ReconcileEvent::TrackerSkipped {
                entity_id: id.to_string(),
            });
            return;
        }

        match tracker.evaluate(event).await {
            Ok(outcome) => {
                debug!(entity_id = %id, ?outcome, "Offline tracker evaluated");
                self.emit_event(ReconcileEvent::NotificationOutcome {
                    entity_id: id.to_string(),
                    outcome,
                });
            }
            Err(e) => {
                error!(entity_id = %id, "Offline tracking failed: {}", e);
            }
        }
    }

    fn is_fresh(&self, event: &ConnectivityEvent) -> bool {
        match (self.clock.now() - event.time).to_std() {
            Ok(age) => age < self.freshness_window,
            // Timestamp in the future
            Err(_) => true,
        }
    }

    async fn handle_command(&self, kind: EntityKind, command: EntityCommand) -> Result<()> {
        if !command.is_delete() {
            debug!(entity_id = %command.id, kind = %kind, command = %command.command, "Ignoring command");
            self.emit_event(ReconcileEvent::CommandIgnored {
                kind,
                entity_id: command.id,
                command: command.command,
            });
            return Ok(());
        }

        self.state_store.delete_state(kind, &command.id).await?;
        if kind == EntityKind::Device {
            self.episodes.delete_episode(&command.id).await?;
        }

        info!(entity_id = %command.id, kind = %kind, "Entity deleted");
        self.emit_event(ReconcileEvent::EntityDeleted {
            kind,
            entity_id: command.id,
        });
        Ok(())
    }

    fn emit_event(&self, event: ReconcileEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Reconcile event channel full, dropping event. Consider increasing event_channel_capacity.");
            }
            // Nobody is listening
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
