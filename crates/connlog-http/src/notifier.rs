// # HTTP Notifier
//
// Delivers offline notifications with one POST per notification:
//
// POST `{base}/notifications?ignore_duplicates_within_seconds={n}`
// body `{"userId", "title", "message", "topic"}`
//
// The notification service drops duplicates for the same user and message
// within `n` seconds.

use async_trait::async_trait;
use connlog_core::config::NotifierConfig;
use connlog_core::traits::{Notification, Notifier};
use connlog_core::{Error, Result};
use reqwest::Url;
use std::time::Duration;

use crate::status::{describe_status, describe_transport};

const SERVICE: &str = "notification service";

/// Notifier backed by the HTTP notification service
#[derive(Debug, Clone)]
pub struct HttpNotifier {
    endpoint: Url,
    client: reqwest::Client,
}

impl HttpNotifier {
    /// Create a notifier
    ///
    /// # Parameters
    ///
    /// - `base_url`: Notification service base URL
    /// - `dedup_window_secs`: Duplicate suppression window passed to the service
    /// - `timeout`: Per-request timeout
    pub fn new(base_url: &str, dedup_window_secs: u64, timeout: Duration) -> Result<Self> {
        let mut endpoint = Url::parse(base_url.trim())
            .map_err(|e| Error::config(format!("Invalid notification URL {:?}: {}", base_url, e)))?;
        endpoint
            .path_segments_mut()
            .map_err(|_| Error::config(format!("Notification URL {:?} cannot be a base", base_url)))?
            .pop_if_empty()
            .push("notifications");
        endpoint
            .query_pairs_mut()
            .append_pair("ignore_duplicates_within_seconds", &dedup_window_secs.to_string());

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { endpoint, client })
    }

    /// Build from configuration; `None` when notifications are disabled
    pub fn from_config(config: &NotifierConfig) -> Result<Option<Self>> {
        if !config.is_enabled() {
            return Ok(None);
        }
        let url = config.url.as_deref().unwrap_or_default();
        Self::new(
            url,
            config.dedup_window_secs,
            Duration::from_secs(config.timeout_secs),
        )
        .map(Some)
    }

    /// Full request URL including the dedup query
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        tracing::debug!(
            user_id = %notification.user_id,
            topic = %notification.topic,
            "Sending notification"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(notification)
            .send()
            .await
            .map_err(|e| Error::notifier(describe_transport(SERVICE, &e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::notifier(describe_status(SERVICE, status, &body)));
        }

        Ok(())
    }
}
