// # Device Registry Client
//
// Pushes connectivity to the device repository:
//
// - PUT `{base}/devices/{id}/connection-state`
// - PUT `{base}/hubs/{id}/connection-state`
//
// with a JSON boolean body and the internal service token as a bearer
// credential.

use async_trait::async_trait;
use connlog_core::config::RegistryConfig;
use connlog_core::traits::RegistrySync;
use connlog_core::{Error, Result};
use reqwest::Url;
use std::time::Duration;

use crate::status::{describe_status, describe_transport};

const SERVICE: &str = "device repository";

/// Client for the device repository's connection-state endpoints
///
/// # Security
///
/// The Debug implementation does NOT expose the token.
#[derive(Clone)]
pub struct DeviceRegistryClient {
    base_url: Url,
    /// ⚠️ NEVER log this value
    token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for DeviceRegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistryClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"<REDACTED>")
            .finish()
    }
}

impl DeviceRegistryClient {
    /// Create a client
    ///
    /// # Parameters
    ///
    /// - `base_url`: Device repository base URL
    /// - `token`: Internal service token
    /// - `timeout`: Per-request timeout
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| Error::config(format!("Invalid device repository URL {:?}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::config(format!(
                "Device repository URL {:?} cannot be a base",
                base_url.as_str()
            )));
        }

        let token = token.into();
        if token.trim().is_empty() {
            return Err(Error::config("Device repository token cannot be empty"));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url,
            token,
            client,
        })
    }

    /// Build from configuration; `None` when registry sync is disabled
    pub fn from_config(config: &RegistryConfig) -> Result<Option<Self>> {
        if !config.is_enabled() {
            return Ok(None);
        }
        Self::new(
            config.url.as_deref().unwrap_or_default(),
            config.token.clone().unwrap_or_default(),
            Duration::from_secs(config.timeout_secs),
        )
        .map(Some)
    }

    fn state_url(&self, collection: &str, id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend([collection, id, "connection-state"]);
        }
        url
    }

    async fn put_state(&self, collection: &str, id: &str, online: bool) -> Result<()> {
        let url = self.state_url(collection, id);
        tracing::debug!(entity_id = %id, online, "Syncing {} connection state", collection);

        let response = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .json(&online)
            .send()
            .await
            .map_err(|e| Error::registry(describe_transport(SERVICE, &e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::registry(describe_status(SERVICE, status, &body)));
        }

        Ok(())
    }
}

#[async_trait]
impl RegistrySync for DeviceRegistryClient {
    async fn sync_device_state(&self, device_id: &str, online: bool) -> Result<()> {
        self.put_state("devices", device_id, online).await
    }

    async fn sync_hub_state(&self, hub_id: &str, online: bool) -> Result<()> {
        self.put_state("hubs", hub_id, online).await
    }
}
