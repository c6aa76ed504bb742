//! Builds SMTP-backed consumers for the pool.

use async_trait::async_trait;
use courier_broker::{
    BrokerConfig, ConsumerFactory, EmailConsumer, MemoryBroker, build_consumer,
};
use courier_core::TransportError;
use courier_smtp::{EmailSender, LettreConnector, SmtpConfig};

/// Gives every consumer its own [`EmailSender`] over a fresh SMTP connector,
/// so consumers never share a session.
#[derive(Debug)]
pub struct SmtpConsumerFactory {
    broker: BrokerConfig,
    smtp: SmtpConfig,
    memory: Option<MemoryBroker>,
}

impl SmtpConsumerFactory {
    /// `memory` must be set when `broker.backend` is the in-memory backend.
    pub fn new(broker: BrokerConfig, smtp: SmtpConfig, memory: Option<MemoryBroker>) -> Self {
        Self {
            broker,
            smtp,
            memory,
        }
    }
}

#[async_trait]
impl ConsumerFactory for SmtpConsumerFactory {
    async fn create(&self, index: usize) -> Result<Box<dyn EmailConsumer>, TransportError> {
        let connector = LettreConnector::new(self.smtp.clone());
        let sender = EmailSender::new(Box::new(connector), self.smtp.idle_timeout());
        let id = format!("{}-consumer-{index}", self.broker.backend);
        build_consumer(&self.broker, self.memory.as_ref(), &id, sender).await
    }
}
