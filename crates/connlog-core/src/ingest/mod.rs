//! Ingestion loops
//!
//! One [`IngestionLoop`] per stream pulls deliveries strictly one at a time,
//! decodes them, hands them to the [`Reconciler`] and settles them:
//! acknowledge on success, negative-acknowledge on any failure so the
//! transport redelivers. Decode failures are treated like any other
//! failure, so a malformed message is retried until it is removed from
//! the stream by other means.
//!
//! [`Ingestion`] runs a set of loops concurrently until cancellation.

pub mod memory;

pub use memory::MemoryStream;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::event::decode;
use crate::reconciler::Reconciler;
use crate::traits::MessageStream;

/// Kind of payload carried by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    DeviceLog,
    HubLog,
    DeviceCommand,
    HubCommand,
}

impl StreamKind {
    /// Every stream kind, in startup order
    pub const ALL: [StreamKind; 4] = [
        StreamKind::DeviceLog,
        StreamKind::HubLog,
        StreamKind::DeviceCommand,
        StreamKind::HubCommand,
    ];

    /// Short name used in logs and consumer names
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::DeviceLog => "device-log",
            StreamKind::HubLog => "hub-log",
            StreamKind::DeviceCommand => "device-command",
            StreamKind::HubCommand => "hub-command",
        }
    }

    /// Topic this kind is consumed from
    pub fn topic<'a>(&self, config: &'a IngestConfig) -> &'a str {
        match self {
            StreamKind::DeviceLog => &config.device_log_topic,
            StreamKind::HubLog => &config.hub_log_topic,
            StreamKind::DeviceCommand => &config.device_command_topic,
            StreamKind::HubCommand => &config.hub_command_topic,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sequential consumer of one stream
pub struct IngestionLoop {
    kind: StreamKind,
    stream: Box<dyn MessageStream>,
    reconciler: Arc<Reconciler>,
    retry_backoff: Duration,
}

impl IngestionLoop {
    /// Create a loop with a one-second retry backoff
    pub fn new(kind: StreamKind, stream: Box<dyn MessageStream>, reconciler: Arc<Reconciler>) -> Self {
        Self {
            kind,
            stream,
            reconciler,
            retry_backoff: Duration::from_secs(1),
        }
    }

    /// Set the pause after a failed event or fetch
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Kind of stream this loop consumes
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Run until the stream ends or `cancel` fires
    ///
    /// Cancellation is observed while waiting for a delivery and during the
    /// retry backoff. An event already being processed is finished and
    /// settled first.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(kind = %self.kind, topic = %self.stream.name(), "Starting ingestion loop");

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(kind = %self.kind, "Received shutdown signal, stopping ingestion loop");
                    break;
                }
                fetched = self.stream.fetch() => fetched,
            };

            let delivery = match fetched {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    info!(kind = %self.kind, "Stream ended");
                    break;
                }
                Err(e) => {
                    error!(kind = %self.kind, error = %e, "Failed to fetch message");
                    if self.backoff(&cancel).await {
                        break;
                    }
                    continue;
                }
            };

            match self.dispatch(delivery.payload()).await {
                Ok(()) => {
                    if let Err(e) = delivery.ack().await {
                        error!(kind = %self.kind, error = %e, "Failed to acknowledge message");
                    }
                }
                Err(e) => {
                    if e.is_decode() {
                        warn!(kind = %self.kind, error = %e, "Rejecting malformed message");
                    } else {
                        error!(kind = %self.kind, error = %e, "Rejecting message due to processing error");
                    }
                    if let Err(e) = delivery.nak().await {
                        error!(kind = %self.kind, error = %e, "Failed to reject message");
                    }
                    if self.backoff(&cancel).await {
                        break;
                    }
                }
            }
        }

        info!(kind = %self.kind, "Ingestion loop stopped");
        Ok(())
    }

    async fn dispatch(&self, payload: &[u8]) -> Result<()> {
        debug!(kind = %self.kind, bytes = payload.len(), "Dispatching message");
        match self.kind {
            StreamKind::DeviceLog => self.reconciler.log_device(decode(payload)?).await,
            StreamKind::HubLog => self.reconciler.log_hub(decode(payload)?).await,
            StreamKind::DeviceCommand => {
                self.reconciler
                    .handle_device_command(decode(payload)?)
                    .await
            }
            StreamKind::HubCommand => self.reconciler.handle_hub_command(decode(payload)?).await,
        }
    }

    /// Sleep for the retry backoff; true if cancelled meanwhile
    async fn backoff(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(self.retry_backoff) => false,
        }
    }
}

/// Supervisor running several ingestion loops concurrently
#[derive(Default)]
pub struct Ingestion {
    loops: Vec<IngestionLoop>,
}

impl Ingestion {
    /// Create an empty supervisor
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a loop
    pub fn with_loop(mut self, ingestion_loop: IngestionLoop) -> Self {
        self.loops.push(ingestion_loop);
        self
    }

    /// Number of loops
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// Whether no loop was added
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Run every loop until all of them have exited
    ///
    /// # Returns
    ///
    /// - `Ok(())`: All loops exited cleanly
    /// - `Err(Error)`: The first loop failure or panic; the other loops still ran to completion
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let mut set = JoinSet::new();
        for ingestion_loop in self.loops {
            let cancel = cancel.clone();
            set.spawn(async move {
                let kind = ingestion_loop.kind();
                (kind, ingestion_loop.run(cancel).await)
            });
        }

        let mut first_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((kind, Ok(()))) => debug!(kind = %kind, "Ingestion loop exited"),
                Ok((kind, Err(e))) => {
                    error!(kind = %kind, error = %e, "Ingestion loop failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    error!(error = %e, "Ingestion loop panicked");
                    first_error.get_or_insert(Error::Other(format!("ingestion task failed: {}", e)));
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconcilerConfig;
    use crate::event::EntityKind;
    use crate::history::MemoryHistorySink;
    use crate::state::MemoryStateStore;
    use crate::traits::StateStore;

    fn reconciler() -> (Arc<Reconciler>, MemoryStateStore) {
        let store = MemoryStateStore::new();
        let (reconciler, _rx) = Reconciler::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(MemoryHistorySink::new()),
            &ReconcilerConfig::default(),
        )
        .unwrap();
        (Arc::new(reconciler), store)
    }

    #[test]
    fn test_stream_kind_topics() {
        let config = IngestConfig::default();
        assert_eq!(StreamKind::DeviceLog.topic(&config), "device_log");
        assert_eq!(StreamKind::HubLog.topic(&config), "gateway_log");
        assert_eq!(StreamKind::DeviceCommand.topic(&config), "devices");
        assert_eq!(StreamKind::HubCommand.topic(&config), "hubs");
    }

    #[tokio::test]
    async fn test_loop_acks_and_stops_at_end_of_stream() {
        let (reconciler, store) = reconciler();
        let stream = MemoryStream::new("gateway_log");
        stream.publish(r#"{"id":"hub-1","connected":true,"time":"2024-05-01T10:00:00Z"}"#);
        stream.close();

        IngestionLoop::new(StreamKind::HubLog, Box::new(stream.clone()), reconciler)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stream.acked(), 1);
        assert!(store.get_state(EntityKind::Hub, "hub-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_supervisor_stops_on_cancel() {
        let (reconciler, _) = reconciler();
        let ingestion = Ingestion::new()
            .with_loop(IngestionLoop::new(
                StreamKind::HubLog,
                Box::new(MemoryStream::new("a")),
                reconciler.clone(),
            ))
            .with_loop(IngestionLoop::new(
                StreamKind::HubCommand,
                Box::new(MemoryStream::new("b")),
                reconciler,
            ));
        assert_eq!(ingestion.len(), 2);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(ingestion.run(cancel.clone()));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervisor did not stop")
            .unwrap()
            .unwrap();
    }
}
