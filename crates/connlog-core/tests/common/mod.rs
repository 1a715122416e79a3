//! Test doubles and common utilities for contract tests
//!
//! The doubles record every call and can be switched into a failing mode,
//! so tests can assert both what the reconciler did and how it reacts to
//! collaborator failures.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use connlog_core::clock::ManualClock;
use connlog_core::error::{Error, Result};
use connlog_core::traits::{
    CurrentState, EpisodeStore, HistoryPoint, HistorySink, Notification, Notifier,
    OfflineEpisode, RegistrySync, StateStore,
};
use connlog_core::{
    DeviceLog, EntityKind, HubLog, MemoryStateStore, ReconcileEvent, Reconciler, ReconcilerConfig,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Fixed start of every test timeline
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

/// `t0` plus `millis`
pub fn at(millis: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::milliseconds(millis)
}

/// A device log with monitoring enabled (threshold "2s", owner "user-9")
pub fn monitored_device(id: &str, connected: bool, time: DateTime<Utc>) -> DeviceLog {
    DeviceLog {
        id: id.to_string(),
        connected,
        time,
        monitor_connection_state: Some("2s".to_string()),
        device_owner: Some("user-9".to_string()),
        device_name: Some("Sensor".to_string()),
    }
}

/// A device log without monitoring fields
pub fn plain_device(id: &str, connected: bool, time: DateTime<Utc>) -> DeviceLog {
    DeviceLog {
        id: id.to_string(),
        connected,
        time,
        monitor_connection_state: None,
        device_owner: None,
        device_name: None,
    }
}

pub fn hub(id: &str, connected: bool, time: DateTime<Utc>) -> HubLog {
    HubLog {
        id: id.to_string(),
        connected,
        time,
    }
}

/// Memory state store that can be told to fail
pub struct FlakyStateStore {
    inner: MemoryStateStore,
    fail: Arc<AtomicBool>,
    set_state_calls: Arc<AtomicUsize>,
}

impl FlakyStateStore {
    pub fn new(inner: MemoryStateStore) -> Self {
        Self {
            inner,
            fail: Arc::new(AtomicBool::new(false)),
            set_state_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every call fail (or succeed again)
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_state_calls(&self) -> usize {
        self.set_state_calls.load(Ordering::SeqCst)
    }

    /// Create a new FlakyStateStore that shares state and switches with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            inner: other.inner.clone(),
            fail: Arc::clone(&other.fail),
            set_state_calls: Arc::clone(&other.set_state_calls),
        }
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::state_store("store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FlakyStateStore {
    async fn set_state(
        &self,
        kind: EntityKind,
        entity_id: &str,
        online: bool,
        time: DateTime<Utc>,
    ) -> Result<bool> {
        self.set_state_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.set_state(kind, entity_id, online, time).await
    }

    async fn get_state(&self, kind: EntityKind, entity_id: &str) -> Result<Option<CurrentState>> {
        self.check()?;
        self.inner.get_state(kind, entity_id).await
    }

    async fn delete_state(&self, kind: EntityKind, entity_id: &str) -> Result<()> {
        self.check()?;
        self.inner.delete_state(kind, entity_id).await
    }

    async fn list_states(&self, kind: EntityKind) -> Result<Vec<CurrentState>> {
        self.inner.list_states(kind).await
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl EpisodeStore for FlakyStateStore {
    async fn get_episode(&self, device_id: &str) -> Result<Option<OfflineEpisode>> {
        self.check()?;
        self.inner.get_episode(device_id).await
    }

    async fn put_episode(&self, episode: &OfflineEpisode) -> Result<()> {
        self.check()?;
        self.inner.put_episode(episode).await
    }

    async fn delete_episode(&self, device_id: &str) -> Result<()> {
        self.check()?;
        self.inner.delete_episode(device_id).await
    }
}

/// History sink that records points and can be told to fail
#[derive(Default)]
pub struct MockHistorySink {
    points: Arc<Mutex<Vec<HistoryPoint>>>,
    fail: Arc<AtomicBool>,
}

impl MockHistorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> Vec<HistoryPoint> {
        self.points.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            points: Arc::clone(&other.points),
            fail: Arc::clone(&other.fail),
        }
    }
}

#[async_trait]
impl HistorySink for MockHistorySink {
    async fn append(&self, point: &HistoryPoint) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::history("influx down"));
        }
        self.points.lock().unwrap().push(point.clone());
        Ok(())
    }
}

/// Notifier that records notifications and can be told to fail
#[derive(Default)]
pub struct MockNotifier {
    sent: Arc<Mutex<Vec<(DateTime<Utc>, Notification)>>>,
    attempts: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    clock: Option<Arc<ManualClock>>,
}

impl MockNotifier {
    /// Notifier that stamps each notification with `clock`'s time
    pub fn with_clock(clock: Arc<ManualClock>) -> Self {
        Self {
            clock: Some(clock),
            ..Self::default()
        }
    }

    /// Notifications sent successfully
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().iter().map(|(_, n)| n.clone()).collect()
    }

    /// Times at which notifications were sent
    pub fn sent_at(&self) -> Vec<DateTime<Utc>> {
        self.sent.lock().unwrap().iter().map(|(t, _)| *t).collect()
    }

    /// Calls including failed ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            sent: Arc::clone(&other.sent),
            attempts: Arc::clone(&other.attempts),
            fail: Arc::clone(&other.fail),
            clock: other.clock.clone(),
        }
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        use connlog_core::Clock;

        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::notifier("unexpected status 503"));
        }
        let now = self.clock.as_ref().map(|c| c.now()).unwrap_or_else(Utc::now);
        self.sent.lock().unwrap().push((now, notification.clone()));
        Ok(())
    }
}

/// Registry that records syncs and can be told to fail
#[derive(Default)]
pub struct MockRegistry {
    device_syncs: Arc<Mutex<Vec<(String, bool)>>>,
    hub_syncs: Arc<Mutex<Vec<(String, bool)>>>,
    fail: Arc<AtomicBool>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device_syncs(&self) -> Vec<(String, bool)> {
        self.device_syncs.lock().unwrap().clone()
    }

    pub fn hub_syncs(&self) -> Vec<(String, bool)> {
        self.hub_syncs.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            device_syncs: Arc::clone(&other.device_syncs),
            hub_syncs: Arc::clone(&other.hub_syncs),
            fail: Arc::clone(&other.fail),
        }
    }
}

#[async_trait]
impl RegistrySync for MockRegistry {
    async fn sync_device_state(&self, device_id: &str, online: bool) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::registry("device repository unavailable"));
        }
        self.device_syncs
            .lock()
            .unwrap()
            .push((device_id.to_string(), online));
        Ok(())
    }

    async fn sync_hub_state(&self, hub_id: &str, online: bool) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::registry("device repository unavailable"));
        }
        self.hub_syncs.lock().unwrap().push((hub_id.to_string(), online));
        Ok(())
    }
}

/// Reconciler wired to test doubles, with a manual clock starting at `t0`
pub struct Harness {
    pub reconciler: Arc<Reconciler>,
    pub events: mpsc::Receiver<ReconcileEvent>,
    pub state: MemoryStateStore,
    pub store: FlakyStateStore,
    pub history: MockHistorySink,
    pub notifier: MockNotifier,
    pub registry: MockRegistry,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        let state = MemoryStateStore::new();
        let store = FlakyStateStore::new(state.clone());
        let history = MockHistorySink::new();
        let clock = Arc::new(ManualClock::new(t0()));
        let notifier = MockNotifier::with_clock(clock.clone());
        let registry = MockRegistry::new();

        let config = ReconcilerConfig {
            round_time: "1s".to_string(),
            ..ReconcilerConfig::default()
        };
        let (reconciler, events) = Reconciler::new(
            Arc::new(FlakyStateStore::sharing_counters_with(&store)),
            Arc::new(FlakyStateStore::sharing_counters_with(&store)),
            Arc::new(MockHistorySink::sharing_counters_with(&history)),
            &config,
        )
        .expect("reconciler construction succeeds");
        let reconciler = reconciler
            .with_clock(clock.clone())
            .with_notifier(Arc::new(MockNotifier::sharing_counters_with(&notifier)))
            .with_registry(Arc::new(MockRegistry::sharing_counters_with(&registry)));

        Self {
            reconciler: Arc::new(reconciler),
            events,
            state,
            store,
            history,
            notifier,
            registry,
            clock,
        }
    }

    /// Move the clock to `t0 + millis` and return that instant
    pub fn advance_to(&self, millis: i64) -> DateTime<Utc> {
        let now = at(millis);
        self.clock.set(now);
        now
    }

    /// Drain every reconcile event emitted so far
    pub fn drain_events(&mut self) -> Vec<ReconcileEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
