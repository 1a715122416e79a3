// # connlog-core
//
// Core library for the connection log worker.
//
// ## Architecture Overview
//
// This library turns a stream of connectivity events into durable state:
// - **StateStore**: Current online/offline state per entity, with change detection
// - **EpisodeStore**: Offline-episode bookkeeping for notification debouncing
// - **HistorySink**: Append-only time series of actual state transitions
// - **Notifier**: Delivers offline notifications to device owners
// - **RegistrySync**: Pushes connectivity state to the external device registry
// - **OfflineTracker**: Decides when an offline episode crosses its threshold
// - **Reconciler**: Orchestrates the event → state → history → notification flow
// - **IngestionLoop**: Pulls events from a message stream and acknowledges them
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from transports and stores
// 2. **At-Least-Once Tolerant**: Reprocessing an event never duplicates history
// 3. **Explicit Handles**: Every collaborator is passed in, nothing is global
// 4. **Library-First**: All core functionality can be used as a library

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod history;
pub mod ingest;
pub mod reconciler;
pub mod state;
pub mod tracker;
pub mod traits;

// Re-export core types for convenience
pub use clock::{Clock, SystemClock};
pub use config::{
    HistoryConfig, IngestConfig, NotifierConfig, ReconcilerConfig, RegistryConfig,
    StateStoreConfig, WorkerConfig,
};
pub use error::{Error, Result};
pub use event::{ConnectivityEvent, DeviceCommand, DeviceLog, EntityKind, HubCommand, HubLog};
pub use history::MemoryHistorySink;
pub use ingest::{Ingestion, IngestionLoop, MemoryStream, StreamKind};
pub use reconciler::{ReconcileEvent, Reconciler};
pub use state::{FileStateStore, MemoryStateStore};
pub use tracker::{OfflineTracker, TrackerOutcome};
pub use traits::{
    CurrentState, Delivery, EpisodeStore, HistoryPoint, HistorySink, MessageStream,
    Notification, Notifier, OfflineEpisode, RegistrySync, StateStore,
};
