use async_trait::async_trait;
use courier_core::{EmailMessage, TransportError};

/// Publishes email messages to the backend's single logical destination.
///
/// `produce` returns once the broker client has accepted the payload. It
/// does not wait for broker acknowledgement and never retries.
#[async_trait]
pub trait EmailProducer: Send + Sync {
    async fn produce(&self, message: &EmailMessage) -> Result<(), TransportError>;

    /// Release the backend connection. Later `produce` calls fail.
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str;
}
