// # Memory Stream
//
// In-memory implementation of MessageStream.
//
// Messages are delivered in publish order. A nak puts the message back at
// the head of the queue, so it is the next one delivered. Closing the
// stream makes `fetch` return `None` once the queue drains.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use crate::Error;
use crate::traits::transport::{Delivery, MessageStream};

/// In-memory message stream
///
/// Clones share the same queue: keep one clone to publish and hand another
/// to an ingestion loop.
#[derive(Debug, Clone)]
pub struct MemoryStream {
    name: String,
    inner: Arc<Queue>,
}

#[derive(Debug, Default)]
struct Queue {
    state: Mutex<QueueState>,
    notify: Notify,
    acked: AtomicUsize,
    nacked: AtomicUsize,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Vec<u8>>,
    closed: bool,
}

impl Queue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MemoryStream {
    /// Create an empty stream
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Queue::default()),
        }
    }

    /// Append a raw payload
    pub fn publish(&self, payload: impl Into<Vec<u8>>) {
        self.inner.lock().pending.push_back(payload.into());
        self.inner.notify.notify_one();
    }

    /// Append a value encoded as JSON
    pub fn publish_json<T: Serialize>(&self, value: &T) -> Result<(), Error> {
        self.publish(serde_json::to_vec(value)?);
        Ok(())
    }

    /// Stop accepting waits; `fetch` returns `None` once the queue is empty
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();
    }

    /// Messages waiting for delivery
    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Number of acknowledged deliveries
    pub fn acked(&self) -> usize {
        self.inner.acked.load(Ordering::SeqCst)
    }

    /// Number of rejected deliveries
    pub fn nacked(&self) -> usize {
        self.inner.nacked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn fetch(&self) -> Result<Option<Box<dyn Delivery>>, Error> {
        loop {
            // Register interest before checking so a publish in between is not missed
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.lock();
                if let Some(payload) = state.pending.pop_front() {
                    return Ok(Some(Box::new(MemoryDelivery {
                        payload,
                        queue: self.inner.clone(),
                    })));
                }
                if state.closed {
                    return Ok(None);
                }
            }
            notified.await;
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct MemoryDelivery {
    payload: Vec<u8>,
    queue: Arc<Queue>,
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(self: Box<Self>) -> Result<(), Error> {
        self.queue.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nak(self: Box<Self>) -> Result<(), Error> {
        self.queue.nacked.fetch_add(1, Ordering::SeqCst);
        let MemoryDelivery { payload, queue } = *self;
        queue.lock().pending.push_front(payload);
        queue.notify.notify_one();
        Ok(())
    }
}
