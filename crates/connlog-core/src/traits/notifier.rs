// # Notifier Trait
//
// Delivers an offline notification to a device owner. One call per
// notification; implementations apply their own timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::event::duration::format_duration;

/// Title of offline notifications
pub const DEVICE_OFFLINE_TITLE: &str = "Device Offline";

/// Topic of offline notifications
pub const DEVICE_OFFLINE_TOPIC: &str = "device_offline";

/// Notification payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub topic: String,
}

impl Notification {
    /// Build the "device offline" notification
    ///
    /// `elapsed` is rendered as given; callers round it first.
    pub fn device_offline(
        user_id: impl Into<String>,
        device_name: Option<&str>,
        device_id: &str,
        elapsed: Duration,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            title: DEVICE_OFFLINE_TITLE.to_string(),
            message: format!(
                "device {} ({}) has been offline for {}",
                device_name.unwrap_or_default(),
                device_id,
                format_duration(elapsed)
            ),
            topic: DEVICE_OFFLINE_TOPIC.to_string(),
        }
    }
}

/// Trait for notification delivery
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a notification
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Accepted (2xx or equivalent)
    /// - `Err(Error)`: Transport failure, timeout or rejection
    async fn notify(&self, notification: &Notification) -> Result<(), crate::Error>;
}
