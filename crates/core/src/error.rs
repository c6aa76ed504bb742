use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while talking to the SMTP transport.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The SMTP session could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The SMTP server rejected or failed to accept the message.
    #[error("send failed: {0}")]
    Send(String),

    /// The SMTP session could not be closed cleanly.
    #[error("disconnect failed: {0}")]
    Disconnect(String),

    /// The message could not be turned into a transport-ready email
    /// (invalid address, no recipients, ...).
    #[error("invalid message: {0}")]
    Render(String),

    /// `send` was called on a connector without an open session.
    #[error("no open SMTP session")]
    NotConnected,

    /// The sender has been closed and accepts no further messages.
    #[error("sender is closed")]
    SenderClosed,
}

impl DeliveryError {
    /// Returns `true` if the failure may clear up on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Send(_) | Self::NotConnected)
    }
}

/// A payload could not be encoded to or decoded from the wire format.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("failed to encode email message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed email payload: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Errors raised by broker producers and consumers.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker could not be reached.
    #[error("broker connection error: {0}")]
    Connection(String),

    /// Publishing a message failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Reading the next message failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// The transport was closed. Read loops treat this as the shutdown signal.
    #[error("transport closed")]
    Closed,

    /// The backend was configured incorrectly or is unavailable in this build.
    #[error("invalid broker configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

impl TransportError {
    /// Returns `true` for the graceful-shutdown signal.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// A file could not be loaded as an attachment.
#[derive(Debug, Error)]
#[error("failed to read attachment {}: {source}", path.display())]
pub struct FileError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}
