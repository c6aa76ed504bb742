//! Completion notifications raised after a successful SMTP hand-off.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use courier_core::EmailMessage;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::warn;

/// What an observer learns about a delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSentEvent {
    /// Consumer that delivered the message.
    pub consumer_id: String,
    pub subject: String,
    pub to: Vec<String>,
    pub sent_at: DateTime<Utc>,
}

impl EmailSentEvent {
    pub fn new(consumer_id: &str, message: &EmailMessage) -> Self {
        Self {
            consumer_id: consumer_id.to_owned(),
            subject: message.subject.clone(),
            to: message.to.clone(),
            sent_at: Utc::now(),
        }
    }
}

/// Listener invoked synchronously, on the consumer's read loop, once per
/// delivered message. Implementations must not block.
pub trait EmailSentObserver: Send + Sync {
    fn on_email_sent(&self, event: &EmailSentEvent);
}

impl<F> EmailSentObserver for F
where
    F: Fn(&EmailSentEvent) + Send + Sync,
{
    fn on_email_sent(&self, event: &EmailSentEvent) {
        self(event);
    }
}

/// Forwards events into a bounded channel. Events that do not fit are
/// dropped with a warning rather than stalling the consumer.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::Sender<EmailSentEvent>,
}

impl ChannelObserver {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EmailSentEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl EmailSentObserver for ChannelObserver {
    fn on_email_sent(&self, event: &EmailSentEvent) {
        if let Err(e) = self.tx.try_send(event.clone()) {
            warn!(consumer_id = %event.consumer_id, error = %e, "dropping email-sent event");
        }
    }
}

/// Counts notifications.
#[derive(Debug, Default)]
pub struct CountingObserver {
    count: AtomicUsize,
}

impl CountingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl EmailSentObserver for CountingObserver {
    fn on_email_sent(&self, _event: &EmailSentEvent) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Append-only, ordered observer list.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn EmailSentObserver>>>,
}

impl ObserverRegistry {
    pub(crate) fn add(&self, observer: Arc<dyn EmailSentObserver>) {
        self.observers.write().push(observer);
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Notify every observer in registration order. Iterates a snapshot so
    /// registration never waits on a running callback.
    pub(crate) fn notify(&self, event: &EmailSentEvent) {
        let snapshot = self.observers.read().clone();
        for observer in &snapshot {
            observer.on_email_sent(event);
        }
    }
}
