//! Connection state machine shared by every external resource acquisition.

use std::future::Future;

use async_trait::async_trait;
use courier_core::TransportError;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::consumer::MessageSource;
use crate::retry::RetryStrategy;

/// Lifecycle of a broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Drives a dial function through bounded, backed-off attempts and
/// publishes the resulting [`ConnectionState`].
#[derive(Debug)]
pub struct Reconnector {
    resource: String,
    strategy: RetryStrategy,
    max_attempts: u32,
    state: watch::Sender<ConnectionState>,
}

impl Reconnector {
    /// `max_attempts == 0` retries until the dial succeeds.
    pub fn new(resource: impl Into<String>, strategy: RetryStrategy, max_attempts: u32) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            resource: resource.into(),
            strategy,
            max_attempts,
            state,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Record that an established connection was lost.
    pub fn mark_disconnected(&self) {
        if self.state.send_replace(ConnectionState::Disconnected) == ConnectionState::Connected {
            warn!(resource = %self.resource, "connection lost");
        }
    }

    /// Call `dial` until it succeeds or the attempt budget is spent.
    ///
    /// Returns the last dial error when every attempt failed.
    pub async fn connect_with<T, F, Fut>(&self, mut dial: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        self.state.send_replace(ConnectionState::Connecting);
        let mut attempt: u32 = 0;
        loop {
            match dial().await {
                Ok(connection) => {
                    self.state.send_replace(ConnectionState::Connected);
                    info!(resource = %self.resource, attempts = attempt + 1, "connected");
                    return Ok(connection);
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    if self.max_attempts != 0 && attempt >= self.max_attempts {
                        self.state.send_replace(ConnectionState::Disconnected);
                        error!(
                            resource = %self.resource,
                            attempts = attempt,
                            error = %e,
                            "giving up on connection"
                        );
                        return Err(e);
                    }
                    let delay = self.strategy.delay_for(attempt - 1);
                    warn!(
                        resource = %self.resource,
                        attempt,
                        error = %e,
                        retry_in = ?delay,
                        "connection attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Opens connections to one broker resource.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn dial(&self) -> Result<Self::Connection, TransportError>;

    /// Whether `connection` can still be used. Dead connections are
    /// replaced on the next [`Redialing::get`].
    fn is_alive(&self, _connection: &Self::Connection) -> bool {
        true
    }

    /// Release a connection that is no longer wanted.
    async fn close(&self, _connection: Self::Connection) -> Result<(), TransportError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str;
}

/// A broker-side subscription yielding payloads.
#[async_trait]
pub trait Subscription: Send {
    /// The next payload, or `None` once the broker ended the subscription.
    async fn next_payload(&mut self) -> Option<Result<Vec<u8>, TransportError>>;
}

/// Holds at most one live connection and redials through its
/// [`Reconnector`] whenever the previous one was lost.
pub struct Redialing<D: Dialer> {
    dialer: D,
    reconnector: Reconnector,
    current: Option<D::Connection>,
}

impl<D: Dialer> std::fmt::Debug for Redialing<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redialing")
            .field("resource", &self.reconnector.resource())
            .field("state", &self.reconnector.state())
            .finish_non_exhaustive()
    }
}

impl<D: Dialer> Redialing<D> {
    /// Nothing is dialed until the first [`get`](Self::get).
    pub fn new(dialer: D, reconnector: Reconnector) -> Self {
        Self {
            dialer,
            reconnector,
            current: None,
        }
    }

    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    pub fn reconnector(&self) -> &Reconnector {
        &self.reconnector
    }

    /// The live connection, dialing a new one if there is none or the
    /// current one died.
    pub async fn get(&mut self) -> Result<&mut D::Connection, TransportError> {
        let connection = match self.current.take() {
            Some(connection) if self.dialer.is_alive(&connection) => connection,
            stale => {
                if stale.is_some() {
                    self.reconnector.mark_disconnected();
                }
                let dialer = &self.dialer;
                self.reconnector.connect_with(|| dialer.dial()).await?
            }
        };
        Ok(self.current.insert(connection))
    }

    /// Drop the current connection after the broker lost it.
    pub fn lose(&mut self) {
        if self.current.take().is_some() {
            debug!(resource = %self.reconnector.resource(), "dropping lost connection");
        }
        self.reconnector.mark_disconnected();
    }

    /// Close the current connection, if any.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        let Some(connection) = self.current.take() else {
            return Ok(());
        };
        let result = self.dialer.close(connection).await;
        self.reconnector.mark_disconnected();
        result
    }
}

#[async_trait]
impl<D> MessageSource for Redialing<D>
where
    D: Dialer,
    D::Connection: Subscription,
{
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let next = self.get().await?.next_payload().await;
        match next {
            Some(Ok(payload)) => Ok(payload),
            Some(Err(e)) => {
                self.lose();
                Err(e)
            }
            // Only `shutdown` ends a subscription on purpose, and it never
            // races with `recv`, so this is a broker-side loss.
            None => {
                self.lose();
                Err(TransportError::Receive(
                    "subscription ended by the broker, redialing".to_owned(),
                ))
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.close().await
    }

    fn backend_name(&self) -> &'static str {
        self.dialer.backend_name()
    }
}
