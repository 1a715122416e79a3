//! Contract Test: Failure Propagation
//!
//! Verifies which collaborator failures abort an event (so it is not
//! acknowledged and gets redelivered) and which are swallowed.
//!
//! - Registry failure: aborts before any local state is touched
//! - State store failure: aborts, no history appended
//! - History failure: returned after the state was written
//! - Notifier failure: logged only (see offline_notification_contract)

mod common;

use common::*;
use connlog_core::{EntityKind, EpisodeStore, Error, StateStore};

#[tokio::test]
async fn registry_failure_aborts_before_state_write() {
    let h = Harness::new();
    h.registry.set_failing(true);
    let now = h.advance_to(0);

    let result = h.reconciler.log_hub(hub("hub-1", true, now)).await;

    assert!(matches!(result, Err(Error::Registry(_))));
    assert_eq!(h.store.set_state_calls(), 0);
    assert!(h.state.get_state(EntityKind::Hub, "hub-1").await.unwrap().is_none());
    assert!(h.history.points().is_empty());
}

#[tokio::test]
async fn registry_failure_on_device_skips_tracker() {
    let h = Harness::new();
    h.registry.set_failing(true);
    let now = h.advance_to(0);

    assert!(
        h.reconciler
            .log_device(monitored_device("dev-1", false, now))
            .await
            .is_err()
    );
    assert!(h.state.get_state(EntityKind::Device, "dev-1").await.unwrap().is_none());
    assert_eq!(h.notifier.attempts(), 0);
}

#[tokio::test]
async fn state_store_failure_aborts_without_history() {
    let h = Harness::new();
    h.store.set_failing(true);
    let now = h.advance_to(0);

    let result = h.reconciler.log_hub(hub("hub-1", true, now)).await;

    assert!(matches!(result, Err(Error::StateStore(_))));
    assert!(h.history.points().is_empty());

    // Redelivery after recovery records the transition once
    h.store.set_failing(false);
    h.reconciler.log_hub(hub("hub-1", true, now)).await.unwrap();
    assert_eq!(h.history.points().len(), 1);
}

#[tokio::test]
async fn history_failure_is_returned_after_state_write() {
    let h = Harness::new();
    h.history.set_failing(true);
    let now = h.advance_to(0);

    let result = h.reconciler.log_hub(hub("hub-1", false, now)).await;
    assert!(matches!(result, Err(Error::History(_))));

    // State already reflects the event; a redelivery is no longer a change
    let state = h.state.get_state(EntityKind::Hub, "hub-1").await.unwrap().unwrap();
    assert!(!state.online);

    h.history.set_failing(false);
    h.reconciler.log_hub(hub("hub-1", false, now)).await.unwrap();
    assert!(h.history.points().is_empty());
}

#[tokio::test]
async fn history_failure_skips_tracker_for_that_delivery() {
    let h = Harness::new();
    h.history.set_failing(true);
    let now = h.advance_to(0);

    assert!(
        h.reconciler
            .log_device(monitored_device("dev-1", false, now))
            .await
            .is_err()
    );
    assert!(h.state.get_episode("dev-1").await.unwrap().is_none());
}
