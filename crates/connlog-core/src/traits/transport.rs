// # Message Stream Traits
//
// Transport abstraction for the ingestion loop: a stream hands out one
// delivery at a time, in order, and redelivers anything that is not
// acknowledged.
//
// ## Implementations
//
// - NATS JetStream durable pull consumer: `connlog-nats` crate
// - In-memory queue: `MemoryStream`

use async_trait::async_trait;

/// Source of raw event payloads
#[async_trait]
pub trait MessageStream: Send + Sync {
    /// Wait for the next delivery
    ///
    /// # Returns
    ///
    /// - `Ok(Some(Delivery))`: The next message
    /// - `Ok(None)`: The stream has ended and will not yield more messages
    /// - `Err(Error)`: Transport failure; the caller may retry
    async fn fetch(&self) -> Result<Option<Box<dyn Delivery>>, crate::Error>;

    /// Human-readable name (subject or topic) for logs
    fn name(&self) -> &str;
}

/// One delivered message awaiting settlement
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Raw message body
    fn payload(&self) -> &[u8];

    /// Confirm processing; the message is not delivered again
    async fn ack(self: Box<Self>) -> Result<(), crate::Error>;

    /// Reject processing; the transport redelivers the message
    async fn nak(self: Box<Self>) -> Result<(), crate::Error>;
}
