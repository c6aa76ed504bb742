//! The read loop shared by every broker backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{TransportError, decode};
use courier_smtp::EmailSender;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::observer::{EmailSentEvent, EmailSentObserver, ObserverRegistry};
use crate::retry::RetryStrategy;

const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Backend-specific reader feeding a [`BrokerConsumer`].
#[async_trait]
pub trait MessageSource: Send + 'static {
    /// Wait for the next payload.
    ///
    /// Returns [`TransportError::Closed`] once the transport has shut down.
    /// Implementations must be cancel-safe: dropping the future must not
    /// lose an already dequeued message.
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Release the reader's backend resources.
    async fn shutdown(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str;
}

/// Pulls email messages from a broker and hands them to an [`EmailSender`].
#[async_trait]
pub trait EmailConsumer: Send + Sync {
    fn id(&self) -> &str;

    /// Register a completion listener. Observers run in registration order.
    fn add_observer(&self, observer: Arc<dyn EmailSentObserver>);

    /// Start the background read loop. Fails if it was already started.
    fn consume(&self) -> Result<(), TransportError>;

    /// Stop reading, wait for the current message to finish, then close
    /// the backend reader and the email sender. Later calls do nothing.
    async fn close_consumer(&self) -> Result<(), TransportError>;

    fn is_running(&self) -> bool;

    fn stats(&self) -> ConsumerStatsSnapshot;
}

#[derive(Debug, Default)]
struct ConsumerStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    malformed: AtomicU64,
    transport_errors: AtomicU64,
}

/// Point-in-time copy of a consumer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    pub delivered: u64,
    pub failed: u64,
    pub malformed: u64,
    pub transport_errors: u64,
}

struct Pipeline {
    id: String,
    sender: EmailSender,
    observers: ObserverRegistry,
    stats: ConsumerStats,
}

impl Pipeline {
    async fn process(&self, payload: &[u8]) {
        let message = match decode(payload) {
            Ok(message) => message,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, bytes = payload.len(), "dropping malformed payload");
                return;
            }
        };

        if let Err(e) = self.sender.send(&message).await {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, subject = %message.subject, "delivery failed, message dropped");
            return;
        }

        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        debug!(subject = %message.subject, "delivered");
        self.observers.notify(&EmailSentEvent::new(&self.id, &message));
    }
}

/// [`EmailConsumer`] over any [`MessageSource`].
pub struct BrokerConsumer<S: MessageSource> {
    pipeline: Arc<Pipeline>,
    source: Mutex<Option<S>>,
    task: Mutex<Option<JoinHandle<Result<(), TransportError>>>>,
    shutdown: CancellationToken,
    running: Arc<AtomicBool>,
    closed: AtomicBool,
    backend: &'static str,
    error_backoff: RetryStrategy,
    close_timeout: Duration,
}

impl<S: MessageSource> BrokerConsumer<S> {
    /// Bind `source` to `sender`. The consumer owns the sender from now on.
    pub fn new(id: impl Into<String>, source: S, sender: EmailSender) -> Self {
        let backend = source.backend_name();
        Self {
            pipeline: Arc::new(Pipeline {
                id: id.into(),
                sender,
                observers: ObserverRegistry::default(),
                stats: ConsumerStats::default(),
            }),
            source: Mutex::new(Some(source)),
            task: Mutex::new(None),
            shutdown: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            backend,
            error_backoff: RetryStrategy::Exponential {
                base: Duration::from_millis(50),
                max: Duration::from_secs(5),
                multiplier: 2.0,
                jitter: true,
            },
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Pause applied after consecutive non-fatal receive errors.
    #[must_use]
    pub fn with_error_backoff(mut self, strategy: RetryStrategy) -> Self {
        self.error_backoff = strategy;
        self
    }

    /// Upper bound on how long `close_consumer` waits for the read loop.
    #[must_use]
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn observer_count(&self) -> usize {
        self.pipeline.observers.len()
    }
}

#[async_trait]
impl<S: MessageSource> EmailConsumer for BrokerConsumer<S> {
    fn id(&self) -> &str {
        &self.pipeline.id
    }

    fn add_observer(&self, observer: Arc<dyn EmailSentObserver>) {
        self.pipeline.observers.add(observer);
    }

    fn consume(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let source = self.source.lock().take().ok_or_else(|| {
            TransportError::Configuration(format!(
                "consumer {} is already consuming",
                self.pipeline.id
            ))
        })?;

        self.running.store(true, Ordering::Release);
        let span = info_span!("consumer", consumer_id = %self.pipeline.id, backend = self.backend);
        let task = tokio::spawn(
            read_loop(
                source,
                Arc::clone(&self.pipeline),
                self.shutdown.clone(),
                self.error_backoff.clone(),
                Arc::clone(&self.running),
            )
            .instrument(span),
        );
        *self.task.lock() = Some(task);
        info!(consumer_id = %self.pipeline.id, backend = self.backend, "consumer started");
        Ok(())
    }

    async fn close_consumer(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown.cancel();

        // Never started: the source is still parked here. Otherwise the
        // read loop shuts it down on exit, even after we stop waiting.
        let source = self.source.lock().take();
        let task = self.task.lock().take();
        let mut result = Ok(());
        if let Some(mut source) = source {
            result = source.shutdown().await;
        } else if let Some(task) = task {
            match tokio::time::timeout(self.close_timeout, task).await {
                Ok(Ok(shutdown)) => result = shutdown,
                Ok(Err(e)) => error!(consumer_id = %self.pipeline.id, error = %e, "read loop panicked"),
                Err(_) => warn!(
                    consumer_id = %self.pipeline.id,
                    timeout = ?self.close_timeout,
                    "read loop still busy, detaching it"
                ),
            }
        }
        if let Err(e) = &result {
            warn!(consumer_id = %self.pipeline.id, error = %e, "backend reader shutdown failed");
        }
        if let Err(e) = self.pipeline.sender.close().await {
            warn!(consumer_id = %self.pipeline.id, error = %e, "email sender close failed");
        }
        info!(consumer_id = %self.pipeline.id, "consumer closed");
        result
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn stats(&self) -> ConsumerStatsSnapshot {
        let stats = &self.pipeline.stats;
        ConsumerStatsSnapshot {
            delivered: stats.delivered.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            malformed: stats.malformed.load(Ordering::Relaxed),
            transport_errors: stats.transport_errors.load(Ordering::Relaxed),
        }
    }
}

async fn read_loop<S: MessageSource>(
    mut source: S,
    pipeline: Arc<Pipeline>,
    shutdown: CancellationToken,
    error_backoff: RetryStrategy,
    running: Arc<AtomicBool>,
) -> Result<(), TransportError> {
    let mut consecutive_errors: u32 = 0;
    loop {
        // Only the wait for the next message is interruptible; a message
        // already received is always processed to completion.
        let received = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            received = source.recv() => received,
        };

        match received {
            Ok(payload) => {
                consecutive_errors = 0;
                pipeline.process(&payload).await;
            }
            Err(TransportError::Closed) => {
                info!("transport closed, read loop exiting");
                break;
            }
            Err(e) => {
                pipeline
                    .stats
                    .transport_errors
                    .fetch_add(1, Ordering::Relaxed);
                let pause = error_backoff.delay_for(consecutive_errors);
                consecutive_errors = consecutive_errors.saturating_add(1);
                warn!(error = %e, retry_in = ?pause, "receive failed");
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(pause) => {}
                }
            }
        }
    }
    running.store(false, Ordering::Release);
    let shutdown = source.shutdown().await;
    debug!("read loop stopped");
    shutdown
}
