//! In-process broker with competing-consumer semantics.
//!
//! Every [`MemorySource`] reads from the same queue, so each published
//! message reaches exactly one consumer. Used for tests and single-process
//! deployments.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use courier_core::{EmailMessage, TransportError, encode};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::consumer::MessageSource;
use crate::producer::EmailProducer;

struct Queue {
    tx: mpsc::Sender<Vec<u8>>,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    closed: CancellationToken,
    published: AtomicU64,
}

/// Handle to a shared in-memory queue. Clones refer to the same queue.
#[derive(Clone)]
pub struct MemoryBroker {
    queue: Arc<Queue>,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("published", &self.published())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl MemoryBroker {
    /// `capacity` bounds how many undelivered payloads the queue holds
    /// before `produce` waits.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            queue: Arc::new(Queue {
                tx,
                rx: Mutex::new(rx),
                closed: CancellationToken::new(),
                published: AtomicU64::new(0),
            }),
        }
    }

    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer {
            broker: self.clone(),
        }
    }

    pub fn source(&self) -> MemorySource {
        MemorySource {
            broker: self.clone(),
        }
    }

    /// Enqueue a raw payload, bypassing the codec.
    pub async fn publish_raw(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.queue
            .tx
            .send(payload)
            .await
            .map_err(|_| TransportError::Closed)?;
        self.queue.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Close the queue. Every pending and future `recv` reports
    /// [`TransportError::Closed`].
    pub fn close(&self) {
        self.queue.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.queue.closed.is_cancelled()
    }

    /// Total payloads accepted since creation.
    pub fn published(&self) -> u64 {
        self.queue.published.load(Ordering::Relaxed)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Producer side of a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryProducer {
    broker: MemoryBroker,
}

#[async_trait]
impl EmailProducer for MemoryProducer {
    async fn produce(&self, message: &EmailMessage) -> Result<(), TransportError> {
        let payload = encode(message)?;
        self.broker.publish_raw(payload).await
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Consumer side of a [`MemoryBroker`].
#[derive(Debug)]
pub struct MemorySource {
    broker: MemoryBroker,
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let queue = &self.broker.queue;
        let mut rx = tokio::select! {
            biased;
            () = queue.closed.cancelled() => return Err(TransportError::Closed),
            rx = queue.rx.lock() => rx,
        };
        tokio::select! {
            biased;
            () = queue.closed.cancelled() => Err(TransportError::Closed),
            payload = rx.recv() => payload.ok_or(TransportError::Closed),
        }
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
