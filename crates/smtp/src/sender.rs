//! Idle-aware email sender.
//!
//! An [`EmailSender`] owns one [`SmtpConnector`] behind a readers/writer lock.
//! Opening and closing the session happen under the write lock, sends run
//! under the read lock so they proceed in parallel once a session is up. A
//! background daemon reacts to activity signals and releases the session
//! after `idle_timeout` without traffic.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use courier_core::{DeliveryError, EmailMessage};
use parking_lot::Mutex;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connector::SmtpConnector;

const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

struct Shared {
    connector: RwLock<Box<dyn SmtpConnector>>,
    closed: AtomicBool,
    name: &'static str,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Open a session unless one is already open. Returns without dialing
    /// when the sender has been closed.
    async fn open_if_disconnected(&self) -> Result<(), DeliveryError> {
        if self.connector.read().await.connection_is_open() {
            return Ok(());
        }
        let mut connector = self.connector.write().await;
        if self.is_closed() || connector.connection_is_open() {
            return Ok(());
        }
        connector.connect().await
    }

    /// Disconnect an idle session. Sends holding the session mean it is not
    /// idle, so the release is skipped rather than queued behind them.
    async fn release_if_open(&self) -> Result<(), DeliveryError> {
        let Ok(mut connector) = self.connector.try_write() else {
            debug!(connector = self.name, "session in use, skipping idle release");
            return Ok(());
        };
        if !connector.connection_is_open() {
            return Ok(());
        }
        connector.disconnect().await
    }
}

/// Sends email over a lazily opened, idle-released SMTP session.
///
/// Must be created inside a Tokio runtime: construction spawns the idle
/// daemon.
pub struct EmailSender {
    shared: Arc<Shared>,
    activity: Mutex<Option<mpsc::Sender<()>>>,
    daemon: Mutex<Option<JoinHandle<Result<(), DeliveryError>>>>,
    close_timeout: Duration,
}

impl std::fmt::Debug for EmailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSender")
            .field("connector", &self.shared.name)
            .field("closed", &self.shared.is_closed())
            .field("close_timeout", &self.close_timeout)
            .finish_non_exhaustive()
    }
}

impl EmailSender {
    /// Wrap `connector` and start the idle daemon.
    pub fn new(connector: Box<dyn SmtpConnector>, idle_timeout: Duration) -> Self {
        let name = connector.name();
        let shared = Arc::new(Shared {
            connector: RwLock::new(connector),
            closed: AtomicBool::new(false),
            name,
        });
        // Capacity 1: a pending signal already tells the daemon everything.
        let (tx, rx) = mpsc::channel(1);
        let daemon = tokio::spawn(idle_daemon(Arc::clone(&shared), rx, idle_timeout));

        Self {
            shared,
            activity: Mutex::new(Some(tx)),
            daemon: Mutex::new(Some(daemon)),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Upper bound on how long [`close`](Self::close) waits for the session
    /// teardown.
    #[must_use]
    pub fn with_close_timeout(mut self, close_timeout: Duration) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    /// Deliver one message, opening a session first if none is open.
    pub async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        if self.shared.is_closed() {
            return Err(DeliveryError::SenderClosed);
        }
        self.signal_activity();
        let result = self.deliver(message).await;
        // The idle window starts when the session was last used, not when
        // the send began.
        self.signal_activity();
        result
    }

    async fn deliver(&self, message: &EmailMessage) -> Result<(), DeliveryError> {
        {
            let connector = self.shared.connector.read().await;
            if self.shared.is_closed() {
                return Err(DeliveryError::SenderClosed);
            }
            if connector.connection_is_open() {
                return connector.send(message).await;
            }
        }

        let mut connector = self.shared.connector.write().await;
        if self.shared.is_closed() {
            return Err(DeliveryError::SenderClosed);
        }
        if !connector.connection_is_open() {
            debug!(connector = self.shared.name, "no open session, connecting");
            connector.connect().await?;
        }
        // Keep the freshly opened session pinned while we use it.
        let connector = connector.downgrade();
        connector.send(message).await
    }

    /// Stop the idle daemon and disconnect the session.
    ///
    /// New sends are rejected immediately. Sends already holding the session
    /// finish before it is torn down. Waits at most the close timeout; past
    /// that the teardown carries on in the background. Only the first call
    /// does anything.
    pub async fn close(&self) -> Result<(), DeliveryError> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        // Dropping the only sender ends the daemon's activity stream.
        drop(self.activity.lock().take());

        let Some(daemon) = self.daemon.lock().take() else {
            return Ok(());
        };
        match tokio::time::timeout(self.close_timeout, daemon).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!(error = %e, "idle daemon terminated abnormally");
                Ok(())
            }
            Err(_) => {
                warn!(
                    timeout = ?self.close_timeout,
                    "session teardown still waiting on in-flight sends, continuing in background"
                );
                Ok(())
            }
        }
    }

    pub async fn connection_is_open(&self) -> bool {
        self.shared.connector.read().await.connection_is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    fn signal_activity(&self) {
        if let Some(tx) = self.activity.lock().as_ref() {
            // A full channel means a signal is already pending.
            let _ = tx.try_send(());
        }
    }
}

async fn idle_daemon(
    shared: Arc<Shared>,
    mut activity: mpsc::Receiver<()>,
    idle_timeout: Duration,
) -> Result<(), DeliveryError> {
    debug!(connector = shared.name, ?idle_timeout, "idle daemon started");
    loop {
        tokio::select! {
            signal = activity.recv() => {
                if signal.is_none() {
                    break;
                }
                if let Err(e) = shared.open_if_disconnected().await {
                    warn!(connector = shared.name, error = %e, "connect on activity failed");
                }
            }
            () = tokio::time::sleep(idle_timeout) => {
                if let Err(e) = shared.release_if_open().await {
                    warn!(connector = shared.name, error = %e, "idle disconnect failed");
                }
            }
        }
    }

    let result = {
        let mut connector = shared.connector.write().await;
        connector.disconnect().await
    };
    info!(connector = shared.name, "idle daemon stopped");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSmtpConnector;

    fn message(subject: &str) -> EmailMessage {
        EmailMessage::new("a@example.com", subject).to("b@example.com")
    }

    #[tokio::test]
    async fn first_send_connects_once() {
        let mock = MockSmtpConnector::new();
        let stats = mock.stats();
        let sender = EmailSender::new(Box::new(mock), Duration::from_secs(30));

        sender.send(&message("one")).await.unwrap();

        stats.assert_connects(1);
        stats.assert_sends(1);
        assert!(sender.connection_is_open().await);
        sender.close().await.unwrap();
    }

    #[tokio::test]
    async fn sequential_sends_reuse_session() {
        let mock = MockSmtpConnector::new();
        let stats = mock.stats();
        let sender = EmailSender::new(Box::new(mock), Duration::from_secs(30));

        for i in 0..5 {
            sender.send(&message(&format!("m{i}"))).await.unwrap();
        }

        stats.assert_connects(1);
        stats.assert_sends(5);
        assert_eq!(stats.disconnects(), 0);
        sender.close().await.unwrap();
    }

    #[tokio::test]
    async fn connect_failure_is_returned() {
        let mock = MockSmtpConnector::new().failing_connect();
        let stats = mock.stats();
        let sender = EmailSender::new(Box::new(mock), Duration::from_secs(30));

        let err = sender.send(&message("x")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Connect(_)));
        stats.assert_sends(0);
        sender.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn send_retries_connect_after_failure() {
        let mock = MockSmtpConnector::new().failing_connect();
        let stats = mock.stats();
        let sender = EmailSender::new(Box::new(mock), Duration::from_millis(100));

        let err = sender.send(&message("one")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Connect(_)));
        assert!(!sender.connection_is_open().await);

        stats.set_fail_connect(false);
        sender.send(&message("two")).await.unwrap();

        assert!(sender.connection_is_open().await);
        assert_eq!(stats.delivered_subjects(), vec!["two"]);

        // The daemon survived the failed connect and still releases the session.
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!sender.connection_is_open().await);
        assert_eq!(stats.disconnects(), 1);
        sender.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_failure_is_returned() {
        let mock = MockSmtpConnector::new().connected().failing_send();
        let sender = EmailSender::new(Box::new(mock), Duration::from_secs(30));

        let err = sender.send(&message("x")).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Send(_)));
        sender.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_disconnects_and_rejects_sends() {
        let mock = MockSmtpConnector::new();
        let stats = mock.stats();
        let sender = EmailSender::new(Box::new(mock), Duration::from_secs(30));

        sender.send(&message("before")).await.unwrap();
        sender.close().await.unwrap();

        assert!(sender.is_closed());
        assert!(!sender.connection_is_open().await);
        assert_eq!(stats.disconnects(), 1);
        assert!(matches!(
            sender.send(&message("after")).await,
            Err(DeliveryError::SenderClosed)
        ));
        stats.assert_sends(1);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mock = MockSmtpConnector::new().connected();
        let stats = mock.stats();
        let sender = EmailSender::new(Box::new(mock), Duration::from_secs(30));

        sender.close().await.unwrap();
        sender.close().await.unwrap();
        assert_eq!(stats.disconnects(), 1);
    }

    #[tokio::test]
    async fn close_reports_disconnect_failure() {
        let mock = MockSmtpConnector::new().connected().failing_disconnect();
        let sender = EmailSender::new(Box::new(mock), Duration::from_secs(30));

        assert!(matches!(
            sender.close().await,
            Err(DeliveryError::Disconnect(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_releases_session() {
        let mock = MockSmtpConnector::new();
        let stats = mock.stats();
        let sender = EmailSender::new(Box::new(mock), Duration::from_millis(100));

        sender.send(&message("one")).await.unwrap();
        assert!(sender.connection_is_open().await);

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(!sender.connection_is_open().await);
        assert_eq!(stats.disconnects(), 1);
        sender.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn activity_resets_idle_timer() {
        let mock = MockSmtpConnector::new();
        let stats = mock.stats();
        let sender = EmailSender::new(Box::new(mock), Duration::from_millis(100));

        for i in 0..5 {
            sender.send(&message(&format!("m{i}"))).await.unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
        }

        assert!(sender.connection_is_open().await);
        assert_eq!(stats.disconnects(), 0);
        stats.assert_connects(1);
        sender.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn idle_window_starts_after_send_completes() {
        let mock = MockSmtpConnector::new().with_latency(Duration::from_millis(2500));
        let stats = mock.stats();
        let sender = EmailSender::new(Box::new(mock), Duration::from_secs(1));

        // Outlasts the idle timeout twice over.
        sender.send(&message("slow")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sender.connection_is_open().await);
        assert_eq!(stats.disconnects(), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!sender.connection_is_open().await);
        assert_eq!(stats.disconnects(), 1);
        sender.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn send_after_idle_release_reconnects() {
        let mock = MockSmtpConnector::new();
        let stats = mock.stats();
        let sender = EmailSender::new(Box::new(mock), Duration::from_millis(100));

        sender.send(&message("one")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        sender.send(&message("two")).await.unwrap();

        stats.assert_connects(2);
        stats.assert_sends(2);
        sender.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_send_finishes_before_close_tears_down() {
        let mock = MockSmtpConnector::new()
            .connected()
            .with_latency(Duration::from_millis(100));
        let stats = mock.stats();
        let sender = Arc::new(EmailSender::new(Box::new(mock), Duration::from_secs(30)));

        let in_flight = {
            let sender = Arc::clone(&sender);
            tokio::spawn(async move { sender.send(&message("slow")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        sender.close().await.unwrap();

        in_flight.await.unwrap().unwrap();
        assert_eq!(stats.delivered_subjects(), vec!["slow"]);
        assert_eq!(stats.disconnects(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn close_is_bounded_by_timeout() {
        let mock = MockSmtpConnector::new()
            .connected()
            .with_latency(Duration::from_millis(500));
        let sender = Arc::new(
            EmailSender::new(Box::new(mock), Duration::from_secs(30))
                .with_close_timeout(Duration::from_millis(50)),
        );

        let in_flight = {
            let sender = Arc::clone(&sender);
            tokio::spawn(async move { sender.send(&message("slow")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let started = std::time::Instant::now();
        sender.close().await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(400));

        in_flight.await.unwrap().unwrap();
    }
}
