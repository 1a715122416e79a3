// # Registry Sync Trait
//
// Pushes the connectivity reported by each event to the external device
// registry. Called once per event, before any local state is touched; a
// failure aborts the event so the transport redelivers it.

use async_trait::async_trait;

/// Trait for device registry synchronisation
#[async_trait]
pub trait RegistrySync: Send + Sync {
    /// Report a device's connectivity
    ///
    /// # Parameters
    ///
    /// - `device_id`: The device id
    /// - `online`: The connectivity carried by the event
    async fn sync_device_state(&self, device_id: &str, online: bool) -> Result<(), crate::Error>;

    /// Report a hub's connectivity
    async fn sync_hub_state(&self, hub_id: &str, online: bool) -> Result<(), crate::Error>;
}
