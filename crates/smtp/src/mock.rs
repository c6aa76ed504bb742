//! In-process connector that records calls for verification.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use courier_core::{DeliveryError, EmailMessage};
use parking_lot::Mutex;

use crate::connector::SmtpConnector;

/// Call counters and failure switches shared between a
/// [`MockSmtpConnector`] and the test that created it, so they stay
/// reachable after the connector has moved into a sender.
#[derive(Debug, Default)]
pub struct MockSmtpStats {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    sends: AtomicUsize,
    failed_sends: AtomicUsize,
    delivered: Mutex<Vec<String>>,
    fail_connect: AtomicBool,
    fail_disconnect: AtomicBool,
    fail_send: AtomicBool,
}

impl MockSmtpStats {
    /// Make later `connect()` calls fail (or succeed again).
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_disconnect(&self, fail: bool) {
        self.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    /// Number of `connect()` calls, successful or not.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of `disconnect()` calls that found an open session.
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Number of `send()` calls, successful or not.
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn failed_sends(&self) -> usize {
        self.failed_sends.load(Ordering::SeqCst)
    }

    /// Subjects of successfully delivered messages, in delivery order.
    pub fn delivered_subjects(&self) -> Vec<String> {
        self.delivered.lock().clone()
    }

    /// Assert that `connect()` was called exactly `n` times.
    ///
    /// # Panics
    ///
    /// Panics if the count differs.
    pub fn assert_connects(&self, n: usize) {
        let count = self.connects();
        assert_eq!(count, n, "expected {n} connects, got {count}");
    }

    /// Assert that `send()` was called exactly `n` times.
    ///
    /// # Panics
    ///
    /// Panics if the count differs.
    pub fn assert_sends(&self, n: usize) {
        let count = self.sends();
        assert_eq!(count, n, "expected {n} sends, got {count}");
    }
}

/// A connector with configurable failures and simulated latency.
#[derive(Debug)]
pub struct MockSmtpConnector {
    connected: bool,
    latency: Option<Duration>,
    stats: Arc<MockSmtpStats>,
}

impl Default for MockSmtpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSmtpConnector {
    /// A disconnected connector whose calls all succeed.
    pub fn new() -> Self {
        Self {
            connected: false,
            latency: None,
            stats: Arc::new(MockSmtpStats::default()),
        }
    }

    /// Start with a session already open.
    #[must_use]
    pub fn connected(mut self) -> Self {
        self.connected = true;
        self
    }

    /// Sleep this long inside every `send()`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    #[must_use]
    pub fn failing_connect(self) -> Self {
        self.stats.set_fail_connect(true);
        self
    }

    #[must_use]
    pub fn failing_disconnect(self) -> Self {
        self.stats.set_fail_disconnect(true);
        self
    }

    #[must_use]
    pub fn failing_send(self) -> Self {
        self.stats.set_fail_send(true);
        self
    }

    /// Handle to the call counters.
    pub fn stats(&self) -> Arc<MockSmtpStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl SmtpConnector for MockSmtpConnector {
    fn connection_is_open(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), DeliveryError> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        // A redial always drops the previous handle.
        self.connected = false;
        if self.stats.fail_connect.load(Ordering::SeqCst) {
            return Err(DeliveryError::Connect("mock connect failure".into()));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), DeliveryError> {
        if !self.connected {
            return Ok(());
        }
        self.stats.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
        if self.stats.fail_disconnect.load(Ordering::SeqCst) {
            return Err(DeliveryError::Disconnect("mock disconnect failure".into()));
        }
        Ok(())
    }

    async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        self.stats.sends.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.connected {
            self.stats.failed_sends.fetch_add(1, Ordering::SeqCst);
            return Err(DeliveryError::NotConnected);
        }
        if self.stats.fail_send.load(Ordering::SeqCst) {
            self.stats.failed_sends.fetch_add(1, Ordering::SeqCst);
            return Err(DeliveryError::Send("mock send failure".into()));
        }
        self.stats.delivered.lock().push(message.subject.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
