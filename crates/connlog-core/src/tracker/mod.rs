//! Offline notification tracker
//!
//! Per-device state machine over [`OfflineEpisode`] records:
//!
//! - connected event: the episode (if any) is closed
//! - first disconnected event: an episode opens at the event time
//! - later disconnected events: once the time since the episode opened
//!   exceeds the device's threshold, the owner is notified exactly once
//!
//! The tracker is event-driven. A device that goes silent after its first
//! offline event is never notified; the next offline event re-evaluates.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::Result;
use crate::event::ConnectivityEvent;
use crate::event::duration::round_duration;
use crate::traits::{EpisodeStore, Notification, Notifier, OfflineEpisode};

/// What a single evaluation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerOutcome {
    /// Device went offline; a new episode started at the event time
    EpisodeOpened,
    /// Device is connected; any open episode was removed
    EpisodeClosed,
    /// Device is offline but has no threshold or owner
    NotMonitored,
    /// Device is offline but the threshold has not been exceeded yet
    Waiting {
        /// Time since the episode opened
        elapsed: Duration,
    },
    /// Threshold exceeded; the owner was notified
    Notified {
        /// Time since the episode opened (unrounded)
        elapsed: Duration,
    },
    /// The owner was already notified for this episode
    AlreadyNotified,
}

/// Decides when an offline episode warrants a notification
pub struct OfflineTracker {
    episodes: Arc<dyn EpisodeStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    round_granularity: Duration,
}

impl OfflineTracker {
    /// Create a tracker with a one-minute rounding granularity
    pub fn new(
        episodes: Arc<dyn EpisodeStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            episodes,
            notifier,
            clock,
            round_granularity: Duration::from_secs(60),
        }
    }

    /// Set the granularity elapsed time is rounded to in messages
    pub fn with_round_granularity(mut self, granularity: Duration) -> Self {
        self.round_granularity = granularity;
        self
    }

    /// Apply one device event to its episode
    ///
    /// # Errors
    ///
    /// Store and notifier failures are returned. After a notifier failure
    /// the episode stays un-notified, so the next qualifying event retries.
    pub async fn evaluate(&self, event: &ConnectivityEvent) -> Result<TrackerOutcome> {
        let device_id = event.entity_id.as_str();

        if event.connected {
            self.episodes.delete_episode(device_id).await?;
            return Ok(TrackerOutcome::EpisodeClosed);
        }

        let Some(mut episode) = self.episodes.get_episode(device_id).await? else {
            self.episodes
                .put_episode(&OfflineEpisode::open(device_id, event.time))
                .await?;
            tracing::debug!(entity_id = %device_id, since = %event.time, "Offline episode opened");
            return Ok(TrackerOutcome::EpisodeOpened);
        };

        if episode.notified {
            return Ok(TrackerOutcome::AlreadyNotified);
        }

        let Some((threshold, owner)) = event.monitoring() else {
            return Ok(TrackerOutcome::NotMonitored);
        };

        // Clock skew can put the episode start in the future
        let elapsed = (self.clock.now() - episode.offline_since)
            .to_std()
            .unwrap_or(Duration::ZERO);

        if elapsed <= threshold {
            return Ok(TrackerOutcome::Waiting { elapsed });
        }

        let notification = Notification::device_offline(
            owner,
            event.display_name.as_deref(),
            device_id,
            round_duration(elapsed, self.round_granularity),
        );
        self.notifier.notify(&notification).await?;

        episode.notified = true;
        self.episodes.put_episode(&episode).await?;

        tracing::info!(
            entity_id = %device_id,
            owner = %owner,
            elapsed_ms = elapsed.as_millis() as u64,
            "Offline notification sent"
        );
        Ok(TrackerOutcome::Notified { elapsed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::event::EntityKind;
    use crate::state::MemoryStateStore;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) -> Result<()> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(crate::Error::notifier("unavailable"));
            }
            self.sent.lock().await.push(notification.clone());
            Ok(())
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn offline(at: DateTime<Utc>) -> ConnectivityEvent {
        ConnectivityEvent {
            entity_id: "dev-1".to_string(),
            entity_kind: EntityKind::Device,
            connected: false,
            time: at,
            monitor_threshold: Some(Duration::from_secs(2)),
            owner_id: Some("user-9".to_string()),
            display_name: Some("Kitchen".to_string()),
        }
    }

    fn setup() -> (OfflineTracker, Arc<RecordingNotifier>, Arc<ManualClock>, MemoryStateStore) {
        let store = MemoryStateStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(t0()));
        let tracker = OfflineTracker::new(Arc::new(store.clone()), notifier.clone(), clock.clone())
            .with_round_granularity(Duration::from_secs(1));
        (tracker, notifier, clock, store)
    }

    #[tokio::test]
    async fn test_notifies_once_after_threshold() {
        let (tracker, notifier, clock, _) = setup();

        assert_eq!(
            tracker.evaluate(&offline(t0())).await.unwrap(),
            TrackerOutcome::EpisodeOpened
        );

        clock.set(t0() + chrono::Duration::seconds(1));
        assert!(matches!(
            tracker.evaluate(&offline(clock.now())).await.unwrap(),
            TrackerOutcome::Waiting { .. }
        ));

        clock.set(t0() + chrono::Duration::milliseconds(3_200));
        assert!(matches!(
            tracker.evaluate(&offline(clock.now())).await.unwrap(),
            TrackerOutcome::Notified { .. }
        ));

        clock.set(t0() + chrono::Duration::seconds(10));
        assert_eq!(
            tracker.evaluate(&offline(clock.now())).await.unwrap(),
            TrackerOutcome::AlreadyNotified
        );

        let sent = notifier.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, "user-9");
        assert_eq!(sent[0].message, "device Kitchen (dev-1) has been offline for 3s");
    }

    #[tokio::test]
    async fn test_elapsed_equal_to_threshold_waits() {
        let (tracker, notifier, clock, _) = setup();
        tracker.evaluate(&offline(t0())).await.unwrap();

        clock.set(t0() + chrono::Duration::seconds(2));
        assert_eq!(
            tracker.evaluate(&offline(clock.now())).await.unwrap(),
            TrackerOutcome::Waiting {
                elapsed: Duration::from_secs(2)
            }
        );
        assert!(notifier.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_negative_threshold_notifies_on_next_offline_event() {
        let (tracker, notifier, clock, _) = setup();
        let mut event = offline(t0());
        event.monitor_threshold = Some(crate::event::duration::parse_duration("-5m").unwrap());

        tracker.evaluate(&event).await.unwrap();
        clock.advance(chrono::Duration::milliseconds(1));
        event.time = clock.now();
        assert!(matches!(
            tracker.evaluate(&event).await.unwrap(),
            TrackerOutcome::Notified { .. }
        ));
        assert_eq!(notifier.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unmonitored_device_never_notifies() {
        let (tracker, notifier, clock, _) = setup();
        let mut event = offline(t0());
        event.owner_id = None;

        tracker.evaluate(&event).await.unwrap();
        clock.advance(chrono::Duration::hours(2));
        event.time = clock.now();
        assert_eq!(
            tracker.evaluate(&event).await.unwrap(),
            TrackerOutcome::NotMonitored
        );
        assert!(notifier.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_closes_episode() {
        let (tracker, _, _, store) = setup();
        tracker.evaluate(&offline(t0())).await.unwrap();
        assert!(store.get_episode("dev-1").await.unwrap().is_some());

        let mut online = offline(t0());
        online.connected = true;
        assert_eq!(
            tracker.evaluate(&online).await.unwrap(),
            TrackerOutcome::EpisodeClosed
        );
        assert!(store.get_episode("dev-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_notifier_failure_leaves_episode_unnotified() {
        let (tracker, notifier, clock, store) = setup();
        tracker.evaluate(&offline(t0())).await.unwrap();

        notifier.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        clock.set(t0() + chrono::Duration::seconds(5));
        assert!(tracker.evaluate(&offline(clock.now())).await.is_err());
        assert!(!store.get_episode("dev-1").await.unwrap().unwrap().notified);

        notifier.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        assert!(matches!(
            tracker.evaluate(&offline(clock.now())).await.unwrap(),
            TrackerOutcome::Notified { .. }
        ));
        assert!(store.get_episode("dev-1").await.unwrap().unwrap().notified);
    }
}
