//! A resizable set of consumers sharing one observer list.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use courier_core::TransportError;
use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::consumer::{ConsumerStatsSnapshot, EmailConsumer};
use crate::observer::EmailSentObserver;

/// Creates consumers for a [`ConsumerPool`], each bound to its own
/// email sender.
#[async_trait]
pub trait ConsumerFactory: Send + Sync {
    async fn create(&self, index: usize) -> Result<Box<dyn EmailConsumer>, TransportError>;
}

/// Starts and stops consumers on demand.
pub struct ConsumerPool {
    factory: Arc<dyn ConsumerFactory>,
    observers: RwLock<Vec<Arc<dyn EmailSentObserver>>>,
    consumers: Mutex<Vec<Box<dyn EmailConsumer>>>,
    next_index: AtomicUsize,
    running: AtomicUsize,
}

impl std::fmt::Debug for ConsumerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerPool")
            .field("running", &self.len())
            .field("observers", &self.observers.read().len())
            .finish_non_exhaustive()
    }
}

impl ConsumerPool {
    pub fn new(factory: Arc<dyn ConsumerFactory>) -> Self {
        Self {
            factory,
            observers: RwLock::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            next_index: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
        }
    }

    /// Register an observer on every current and future consumer.
    pub async fn add_observer(&self, observer: Arc<dyn EmailSentObserver>) {
        let consumers = self.consumers.lock().await;
        self.observers.write().push(Arc::clone(&observer));
        for consumer in consumers.iter() {
            consumer.add_observer(Arc::clone(&observer));
        }
    }

    /// Create and start `n` more consumers.
    ///
    /// Consumers started before a failure keep running.
    pub async fn start(&self, n: usize) -> Result<(), TransportError> {
        let mut consumers = self.consumers.lock().await;
        for _ in 0..n {
            let index = self.next_index.fetch_add(1, Ordering::Relaxed);
            let consumer = self.factory.create(index).await?;
            for observer in self.observers.read().iter() {
                consumer.add_observer(Arc::clone(observer));
            }
            consumer.consume()?;
            consumers.push(consumer);
            self.running.store(consumers.len(), Ordering::Release);
        }
        info!(started = n, running = consumers.len(), "consumers started");
        Ok(())
    }

    /// Close the `n` oldest consumers. Returns how many were stopped.
    pub async fn stop(&self, n: usize) -> usize {
        let stopping: Vec<_> = {
            let mut consumers = self.consumers.lock().await;
            let n = n.min(consumers.len());
            let stopping = consumers.drain(..n).collect();
            self.running.store(consumers.len(), Ordering::Release);
            stopping
        };
        let count = stopping.len();
        close_all(stopping).await;
        info!(stopped = count, running = self.len(), "consumers stopped");
        count
    }

    pub async fn stop_all(&self) -> usize {
        self.stop(usize::MAX).await
    }

    /// Number of consumers currently held by the pool.
    pub fn len(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumers whose read loop is still alive. A loop ends on its own
    /// only when its transport reports a final close.
    pub async fn running(&self) -> usize {
        self.consumers
            .lock()
            .await
            .iter()
            .filter(|c| c.is_running())
            .count()
    }

    /// Counters for every consumer, keyed by consumer id.
    pub async fn stats(&self) -> Vec<(String, ConsumerStatsSnapshot)> {
        self.consumers
            .lock()
            .await
            .iter()
            .map(|c| (c.id().to_owned(), c.stats()))
            .collect()
    }
}

async fn close_all(consumers: Vec<Box<dyn EmailConsumer>>) {
    let results = join_all(consumers.iter().map(|c| c.close_consumer())).await;
    for (consumer, result) in consumers.iter().zip(results) {
        if let Err(e) = result {
            warn!(consumer_id = %consumer.id(), error = %e, "consumer close failed");
        }
    }
}
