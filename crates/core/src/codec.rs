//! JSON wire codec shared by every broker backend.

use crate::error::SerializationError;
use crate::message::EmailMessage;

/// Serialize a message into the broker payload.
pub fn encode(message: &EmailMessage) -> Result<Vec<u8>, SerializationError> {
    serde_json::to_vec(message).map_err(SerializationError::Encode)
}

/// Parse a broker payload back into a message.
pub fn decode(payload: &[u8]) -> Result<EmailMessage, SerializationError> {
    serde_json::from_slice(payload).map_err(SerializationError::Decode)
}
