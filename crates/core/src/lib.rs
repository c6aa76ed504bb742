pub mod codec;
pub mod error;
pub mod message;

pub use codec::{decode, encode};
pub use error::{DeliveryError, FileError, SerializationError, TransportError};
pub use message::EmailMessage;
