//! Backend selection from configuration.

use std::sync::Arc;

use courier_core::TransportError;
use courier_smtp::EmailSender;

use crate::config::{BrokerConfig, BrokerKind};
use crate::consumer::{BrokerConsumer, EmailConsumer};
use crate::memory::MemoryBroker;
use crate::producer::EmailProducer;

fn memory_broker(memory: Option<&MemoryBroker>) -> Result<&MemoryBroker, TransportError> {
    memory.ok_or_else(|| {
        TransportError::Configuration("memory backend selected but no broker supplied".to_owned())
    })
}

#[cfg_attr(all(feature = "kafka", feature = "amqp"), allow(dead_code))]
fn not_compiled(kind: BrokerKind) -> TransportError {
    TransportError::Configuration(format!(
        "{kind} support is not compiled in; enable the `{kind}` feature"
    ))
}

/// Connect a producer for the configured backend. `memory` is only used
/// for [`BrokerKind::Memory`].
pub async fn build_producer(
    config: &BrokerConfig,
    memory: Option<&MemoryBroker>,
) -> Result<Arc<dyn EmailProducer>, TransportError> {
    match config.backend {
        BrokerKind::Memory => Ok(Arc::new(memory_broker(memory)?.producer())),
        BrokerKind::Kafka => kafka_producer(config).await,
        BrokerKind::Amqp => amqp_producer(config).await,
    }
}

/// Connect a consumer for the configured backend and bind it to `sender`.
pub async fn build_consumer(
    config: &BrokerConfig,
    memory: Option<&MemoryBroker>,
    id: &str,
    sender: EmailSender,
) -> Result<Box<dyn EmailConsumer>, TransportError> {
    match config.backend {
        BrokerKind::Memory => Ok(Box::new(BrokerConsumer::new(
            id,
            memory_broker(memory)?.source(),
            sender,
        ))),
        BrokerKind::Kafka => kafka_consumer(config, id, sender).await,
        BrokerKind::Amqp => amqp_consumer(config, id, sender).await,
    }
}

#[cfg(feature = "kafka")]
async fn kafka_producer(config: &BrokerConfig) -> Result<Arc<dyn EmailProducer>, TransportError> {
    Ok(Arc::new(crate::kafka::KafkaProducer::connect(config).await?))
}

#[cfg(not(feature = "kafka"))]
#[allow(clippy::unused_async)]
async fn kafka_producer(_config: &BrokerConfig) -> Result<Arc<dyn EmailProducer>, TransportError> {
    Err(not_compiled(BrokerKind::Kafka))
}

#[cfg(feature = "kafka")]
async fn kafka_consumer(
    config: &BrokerConfig,
    id: &str,
    sender: EmailSender,
) -> Result<Box<dyn EmailConsumer>, TransportError> {
    let source = crate::kafka::KafkaSource::connect(config).await?;
    Ok(Box::new(BrokerConsumer::new(id, source, sender)))
}

#[cfg(not(feature = "kafka"))]
#[allow(clippy::unused_async)]
async fn kafka_consumer(
    _config: &BrokerConfig,
    _id: &str,
    _sender: EmailSender,
) -> Result<Box<dyn EmailConsumer>, TransportError> {
    Err(not_compiled(BrokerKind::Kafka))
}

#[cfg(feature = "amqp")]
async fn amqp_producer(config: &BrokerConfig) -> Result<Arc<dyn EmailProducer>, TransportError> {
    Ok(Arc::new(crate::amqp::AmqpProducer::connect(config).await?))
}

#[cfg(not(feature = "amqp"))]
#[allow(clippy::unused_async)]
async fn amqp_producer(_config: &BrokerConfig) -> Result<Arc<dyn EmailProducer>, TransportError> {
    Err(not_compiled(BrokerKind::Amqp))
}

#[cfg(feature = "amqp")]
async fn amqp_consumer(
    config: &BrokerConfig,
    id: &str,
    sender: EmailSender,
) -> Result<Box<dyn EmailConsumer>, TransportError> {
    let source = crate::amqp::AmqpSource::connect(config, &format!("courier-{id}")).await?;
    Ok(Box::new(BrokerConsumer::new(id, source, sender)))
}

#[cfg(not(feature = "amqp"))]
#[allow(clippy::unused_async)]
async fn amqp_consumer(
    _config: &BrokerConfig,
    _id: &str,
    _sender: EmailSender,
) -> Result<Box<dyn EmailConsumer>, TransportError> {
    Err(not_compiled(BrokerKind::Amqp))
}
