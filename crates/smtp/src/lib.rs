pub mod config;
pub mod connector;
pub mod mock;
pub mod render;
pub mod sender;
pub mod smtp;

pub use config::SmtpConfig;
pub use connector::SmtpConnector;
pub use mock::{MockSmtpConnector, MockSmtpStats};
pub use render::{BodyKind, render};
pub use sender::EmailSender;
pub use smtp::LettreConnector;
