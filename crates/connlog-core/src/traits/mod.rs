//! Core traits for the connection log worker
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`StateStore`]: Current connectivity state with change detection
//! - [`EpisodeStore`]: Offline-episode bookkeeping
//! - [`HistorySink`]: Append-only time series of state transitions
//! - [`Notifier`]: Offline notifications to device owners
//! - [`RegistrySync`]: Connectivity push to the device registry
//! - [`MessageStream`]: Ordered delivery of raw event payloads

pub mod history_sink;
pub mod notifier;
pub mod registry_sync;
pub mod state_store;
pub mod transport;

pub use history_sink::{HistoryPoint, HistorySink};
pub use notifier::{Notification, Notifier};
pub use registry_sync::RegistrySync;
pub use state_store::{CurrentState, EpisodeStore, OfflineEpisode, StateStore};
pub use transport::{Delivery, MessageStream};
