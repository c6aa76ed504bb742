use async_trait::async_trait;
use courier_core::{DeliveryError, EmailMessage};

/// Capability over one live SMTP session.
///
/// Lifecycle calls take `&mut self` and `send` takes `&self`, so an owner
/// that wraps the connector in a readers/writer lock gets the
/// open/close-exclusive, send-shared discipline from the type system.
#[async_trait]
pub trait SmtpConnector: Send + Sync {
    /// Whether a session handle is currently held.
    fn connection_is_open(&self) -> bool;

    /// Dial a fresh session. Any handle already held is released first,
    /// without a `QUIT`.
    async fn connect(&mut self) -> Result<(), DeliveryError>;

    /// Close the session. A no-op when nothing is open.
    async fn disconnect(&mut self) -> Result<(), DeliveryError>;

    /// Transmit one message over the open session.
    ///
    /// Calling this without an open session returns
    /// [`DeliveryError::NotConnected`].
    async fn send(&self, message: &EmailMessage) -> Result<(), DeliveryError>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
