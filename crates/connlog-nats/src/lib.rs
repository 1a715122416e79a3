// # NATS JetStream Transport
//
// Binds the worker's four topics to durable JetStream pull consumers.
//
// ## Delivery semantics
//
// - One durable consumer per topic: `{consumer_group}-{stream kind}`
// - Explicit acknowledgement with `max_ack_pending = 1`, so a topic is
//   delivered strictly in order and a rejected message blocks the ones
//   behind it until it is acknowledged
// - `nak` asks the server to redeliver after the configured backoff
//
// The JetStream stream is created on startup when it does not exist yet.

use async_nats::jetstream::{self, AckKind, consumer::AckPolicy, consumer::pull};
use async_trait::async_trait;
use connlog_core::config::IngestConfig;
use connlog_core::traits::{Delivery, MessageStream};
use connlog_core::{Error, Result, StreamKind};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Connection to a NATS server with JetStream enabled
pub struct NatsTransport {
    jetstream: jetstream::Context,
    config: IngestConfig,
}

impl NatsTransport {
    /// Connect to the server named in `config`
    pub async fn connect(config: &IngestConfig, timeout: Duration) -> Result<Self> {
        info!(url = %config.nats_url, timeout = ?timeout, "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(config.nats_url.as_str())
            .await
            .map_err(|e| Error::transport(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS");
        Ok(Self {
            jetstream: jetstream::new(client),
            config: config.clone(),
        })
    }

    /// Create the stream carrying every topic if it is missing
    pub async fn ensure_stream(&self) -> Result<()> {
        let name = self.config.stream_name.as_str();
        match self.jetstream.get_stream(name).await {
            Ok(_) => {
                info!(stream = %name, "Stream already exists");
            }
            Err(e) => {
                debug!(stream = %name, error = %e, "Stream lookup failed, creating it");
                self.jetstream
                    .create_stream(stream_config(&self.config))
                    .await
                    .map_err(|e| Error::transport(format!("Failed to create stream {}: {}", name, e)))?;
                info!(stream = %name, "Created stream");
            }
        }
        Ok(())
    }

    /// Bind the durable consumer for `kind`
    pub async fn source(&self, kind: StreamKind) -> Result<JetStreamSource> {
        let consumer_config = consumer_config(&self.config, kind);
        let consumer_name = consumer_config.durable_name.clone().unwrap_or_default();
        let topic = kind.topic(&self.config).to_string();

        let consumer = self
            .jetstream
            .create_consumer_on_stream(consumer_config, self.config.stream_name.as_str())
            .await
            .map_err(|e| {
                Error::transport(format!("Failed to create consumer {}: {}", consumer_name, e))
            })?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| Error::transport(format!("Failed to open {} message stream: {}", topic, e)))?;

        info!(consumer = %consumer_name, topic = %topic, "Consumer bound");
        Ok(JetStreamSource {
            topic,
            messages: Mutex::new(messages),
            nak_delay: self.config.retry_backoff(),
        })
    }
}

/// Stream configuration covering all four topics
pub fn stream_config(config: &IngestConfig) -> jetstream::stream::Config {
    jetstream::stream::Config {
        name: config.stream_name.clone(),
        subjects: config
            .topics()
            .iter()
            .map(|(_, topic)| topic.to_string())
            .collect(),
        description: Some("Device and hub connectivity events".to_string()),
        ..Default::default()
    }
}

/// Durable pull consumer configuration for one topic
pub fn consumer_config(config: &IngestConfig, kind: StreamKind) -> pull::Config {
    let name = format!("{}-{}", config.consumer_group, kind.as_str());
    pull::Config {
        name: Some(name.clone()),
        durable_name: Some(name),
        filter_subject: kind.topic(config).to_string(),
        ack_policy: AckPolicy::Explicit,
        max_ack_pending: 1,
        ..Default::default()
    }
}

/// [`MessageStream`] over a JetStream pull consumer
pub struct JetStreamSource {
    topic: String,
    messages: Mutex<pull::Stream>,
    nak_delay: Duration,
}

#[async_trait]
impl MessageStream for JetStreamSource {
    async fn fetch(&self) -> Result<Option<Box<dyn Delivery>>> {
        let next = self.messages.lock().await.next().await;
        match next {
            None => Ok(None),
            Some(Ok(message)) => Ok(Some(Box::new(JetStreamDelivery {
                message,
                nak_delay: self.nak_delay,
            }))),
            Some(Err(e)) => Err(Error::transport(format!(
                "Failed to receive from {}: {}",
                self.topic, e
            ))),
        }
    }

    fn name(&self) -> &str {
        &self.topic
    }
}

struct JetStreamDelivery {
    message: jetstream::Message,
    nak_delay: Duration,
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| Error::transport(format!("ack failed: {}", e)))
    }

    async fn nak(self: Box<Self>) -> Result<()> {
        self.message
            .ack_with(AckKind::Nak(Some(self.nak_delay)))
            .await
            .map_err(|e| Error::transport(format!("nak failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_covers_every_topic() {
        let config = IngestConfig::default();
        let stream = stream_config(&config);
        assert_eq!(stream.name, "connection-log");
        assert_eq!(
            stream.subjects,
            vec!["device_log", "gateway_log", "devices", "hubs"]
        );
    }

    #[test]
    fn test_consumer_is_durable_and_ordered() {
        let config = IngestConfig::default();
        let consumer = consumer_config(&config, StreamKind::HubCommand);
        assert_eq!(
            consumer.durable_name.as_deref(),
            Some("connection-log-worker-hub-command")
        );
        assert_eq!(consumer.filter_subject, "hubs");
        assert_eq!(consumer.ack_policy, AckPolicy::Explicit);
        assert_eq!(consumer.max_ack_pending, 1);
    }

    #[test]
    fn test_consumer_names_are_distinct_per_kind() {
        let config = IngestConfig::default();
        let mut names: Vec<_> = StreamKind::ALL
            .iter()
            .filter_map(|kind| consumer_config(&config, *kind).durable_name)
            .collect();
        names.dedup();
        assert_eq!(names.len(), 4);
    }
}
