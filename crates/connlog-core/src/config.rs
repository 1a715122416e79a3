//! Configuration types for the connection log worker
//!
//! This module defines all configuration structures used throughout the workspace.
//! The daemon fills them from environment variables; embedders can deserialize
//! them from any serde format.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::event::duration::parse_duration;

/// Main worker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Message stream configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Reconciler tuning
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    /// Offline notification endpoint
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Device registry endpoint
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Time-series history backend
    #[serde(default)]
    pub history: HistoryConfig,

    /// Current-state store backend
    #[serde(default)]
    pub state_store: StateStoreConfig,
}

impl WorkerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.ingest.validate()?;
        self.reconciler.validate()?;
        self.notifier.validate()?;
        self.registry.validate()?;
        self.history.validate()?;
        self.state_store.validate()?;
        Ok(())
    }
}

/// Whether an optional endpoint URL is switched on
///
/// Unset, empty and `"-"` all mean "disabled".
pub fn endpoint_enabled(url: Option<&str>) -> bool {
    matches!(url.map(str::trim), Some(u) if !u.is_empty() && u != "-")
}

/// Message stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// NATS server URL
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream stream holding every topic
    #[serde(default = "default_stream_name")]
    pub stream_name: String,

    /// Durable consumer name prefix
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Subject carrying device connectivity logs
    #[serde(default = "default_device_log_topic")]
    pub device_log_topic: String,

    /// Subject carrying hub connectivity logs
    #[serde(default = "default_hub_log_topic")]
    pub hub_log_topic: String,

    /// Subject carrying device commands
    #[serde(default = "default_device_command_topic")]
    pub device_command_topic: String,

    /// Subject carrying hub commands
    #[serde(default = "default_hub_command_topic")]
    pub hub_command_topic: String,

    /// Pause after a failed event before fetching again (milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl IngestConfig {
    /// Validate the ingest configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.nats_url.trim().is_empty() {
            return Err(crate::Error::config("NATS URL cannot be empty"));
        }
        if self.stream_name.trim().is_empty() {
            return Err(crate::Error::config("Stream name cannot be empty"));
        }
        if self.consumer_group.trim().is_empty() {
            return Err(crate::Error::config("Consumer group cannot be empty"));
        }
        for (name, topic) in self.topics() {
            if topic.trim().is_empty() {
                return Err(crate::Error::config(format!("{} topic cannot be empty", name)));
            }
        }
        Ok(())
    }

    /// All four topics, labelled
    pub fn topics(&self) -> [(&'static str, &str); 4] {
        [
            ("device log", &self.device_log_topic),
            ("hub log", &self.hub_log_topic),
            ("device command", &self.device_command_topic),
            ("hub command", &self.hub_command_topic),
        ]
    }

    /// Retry backoff as a [`Duration`]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            nats_url: default_nats_url(),
            stream_name: default_stream_name(),
            consumer_group: default_consumer_group(),
            device_log_topic: default_device_log_topic(),
            hub_log_topic: default_hub_log_topic(),
            device_command_topic: default_device_command_topic(),
            hub_command_topic: default_hub_command_topic(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_stream_name() -> String {
    "connection-log".to_string()
}

fn default_consumer_group() -> String {
    "connection-log-worker".to_string()
}

fn default_device_log_topic() -> String {
    "device_log".to_string()
}

fn default_hub_log_topic() -> String {
    "gateway_log".to_string()
}

fn default_device_command_topic() -> String {
    "devices".to_string()
}

fn default_hub_command_topic() -> String {
    "hubs".to_string()
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

/// Reconciler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Granularity elapsed offline time is rounded to in messages (e.g. "1m")
    #[serde(default = "default_round_time")]
    pub round_time: String,

    /// Events older than this never reach the offline tracker (in seconds)
    #[serde(default = "default_freshness_window_secs")]
    pub freshness_window_secs: u64,

    /// Capacity of the reconcile event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl ReconcilerConfig {
    /// Validate the reconciler configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.round_granularity()?;
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }

    /// Parsed rounding granularity
    pub fn round_granularity(&self) -> Result<Duration, crate::Error> {
        parse_duration(&self.round_time).map_err(|e| {
            crate::Error::config(format!("Invalid round time {:?}: {}", self.round_time, e))
        })
    }

    /// Freshness window as a [`Duration`]
    pub fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.freshness_window_secs)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            round_time: default_round_time(),
            freshness_window_secs: default_freshness_window_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_round_time() -> String {
    "1m".to_string()
}

fn default_freshness_window_secs() -> u64 {
    3600
}

fn default_event_channel_capacity() -> usize {
    1000
}

/// Notification endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Base URL of the notification service; unset, empty or "-" disables it
    #[serde(default)]
    pub url: Option<String>,

    /// Server-side duplicate suppression window (in seconds)
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,

    /// Request timeout (in seconds)
    #[serde(default = "default_notifier_timeout_secs")]
    pub timeout_secs: u64,
}

impl NotifierConfig {
    /// Validate the notifier configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.is_enabled() && self.timeout_secs == 0 {
            return Err(crate::Error::config("Notifier timeout must be > 0"));
        }
        Ok(())
    }

    /// Whether notifications are switched on
    pub fn is_enabled(&self) -> bool {
        endpoint_enabled(self.url.as_deref())
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            url: None,
            dedup_window_secs: default_dedup_window_secs(),
            timeout_secs: default_notifier_timeout_secs(),
        }
    }
}

fn default_dedup_window_secs() -> u64 {
    3600
}

fn default_notifier_timeout_secs() -> u64 {
    5
}

/// Device registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the device repository; unset, empty or "-" disables sync
    #[serde(default)]
    pub url: Option<String>,

    /// Internal service token sent as a bearer credential
    #[serde(default)]
    pub token: Option<String>,

    /// Request timeout (in seconds)
    #[serde(default = "default_registry_timeout_secs")]
    pub timeout_secs: u64,
}

impl RegistryConfig {
    /// Validate the registry configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !self.is_enabled() {
            return Ok(());
        }
        if self.token.as_deref().is_none_or(|t| t.trim().is_empty()) {
            return Err(crate::Error::config(
                "Device repository token is required when the repository URL is set",
            ));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("Registry timeout must be > 0"));
        }
        Ok(())
    }

    /// Whether registry sync is switched on
    pub fn is_enabled(&self) -> bool {
        endpoint_enabled(self.url.as_deref())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            timeout_secs: default_registry_timeout_secs(),
        }
    }
}

fn default_registry_timeout_secs() -> u64 {
    10
}

/// Time-series history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// InfluxDB base URL
    #[serde(default)]
    pub influx_url: Option<String>,

    /// Target database
    #[serde(default = "default_influx_database")]
    pub database: String,

    /// Basic auth user
    #[serde(default)]
    pub username: Option<String>,

    /// Basic auth password
    #[serde(default)]
    pub password: Option<String>,

    /// Request timeout (in seconds)
    #[serde(default = "default_history_timeout_secs")]
    pub timeout_secs: u64,
}

impl HistoryConfig {
    /// Validate the history configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !endpoint_enabled(self.influx_url.as_deref()) {
            return Err(crate::Error::config("InfluxDB URL cannot be empty"));
        }
        if self.database.trim().is_empty() {
            return Err(crate::Error::config("InfluxDB database cannot be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("InfluxDB timeout must be > 0"));
        }
        Ok(())
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            influx_url: None,
            database: default_influx_database(),
            username: None,
            password: None,
            timeout_secs: default_history_timeout_secs(),
        }
    }
}

fn default_influx_database() -> String {
    "connectionlog".to_string()
}

fn default_history_timeout_secs() -> u64 {
    3
}

/// State store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StateStoreConfig {
    /// File-based state store
    File {
        /// Path to the state file
        path: String,
    },

    /// In-memory state store (not persistent)
    Memory,
}

impl StateStoreConfig {
    /// Validate the state store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            StateStoreConfig::File { path } if path.trim().is_empty() => {
                Err(crate::Error::config("State store path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        StateStoreConfig::File {
            path: "/var/lib/connlog/state.json".to_string(),
        }
    }
}
