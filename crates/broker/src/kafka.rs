//! Topic-style backend on Apache Kafka.

use std::time::Duration;

use async_trait::async_trait;
use courier_core::{EmailMessage, TransportError, encode};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message as _;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tracing::{debug, info};

use crate::config::BrokerConfig;
use crate::consumer::MessageSource;
use crate::producer::EmailProducer;

/// Key attached to every published record.
pub const MESSAGE_KEY: &str = "KeyEmails";

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

fn client_config(config: &BrokerConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client.set("bootstrap.servers", config.uri());
    client
}

fn connection_error(e: &KafkaError) -> TransportError {
    TransportError::Connection(format!("kafka: {e}"))
}

/// Publishes to the configured topic without waiting for delivery reports.
pub struct KafkaProducer {
    producer: FutureProducer,
    topic: String,
}

impl std::fmt::Debug for KafkaProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaProducer")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl KafkaProducer {
    pub async fn connect(config: &BrokerConfig) -> Result<Self, TransportError> {
        let reconnector = config.reconnector("producer");
        let producer: FutureProducer = reconnector
            .connect_with(move || async move {
                client_config(config)
                    .set("message.timeout.ms", "5000")
                    .create()
                    .map_err(|e| connection_error(&e))
            })
            .await?;
        info!(topic = %config.topic, "kafka producer ready");
        Ok(Self {
            producer,
            topic: config.topic.clone(),
        })
    }
}

#[async_trait]
impl EmailProducer for KafkaProducer {
    async fn produce(&self, message: &EmailMessage) -> Result<(), TransportError> {
        let payload = encode(message)?;
        let record = FutureRecord::to(&self.topic)
            .key(MESSAGE_KEY)
            .payload(&payload);
        // The delivery report future is dropped: librdkafka still delivers.
        self.producer
            .send_result(record)
            .map_err(|(e, _)| TransportError::Publish(e.to_string()))?;
        debug!(topic = %self.topic, bytes = payload.len(), "record enqueued");
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(FLUSH_TIMEOUT)))
            .await
            .map_err(|e| TransportError::Publish(format!("flush task failed: {e}")))?
            .map_err(|e| TransportError::Publish(format!("flush failed: {e}")))
    }

    fn backend_name(&self) -> &'static str {
        "kafka"
    }
}

/// Reads the topic as a member of the configured consumer group, with
/// offsets auto-committed.
pub struct KafkaSource {
    consumer: StreamConsumer,
}

impl std::fmt::Debug for KafkaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaSource").finish_non_exhaustive()
    }
}

impl KafkaSource {
    pub async fn connect(config: &BrokerConfig) -> Result<Self, TransportError> {
        let reconnector = config.reconnector("consumer");
        let consumer: StreamConsumer = reconnector
            .connect_with(move || async move {
                let consumer: StreamConsumer = client_config(config)
                    .set("group.id", &config.group_id)
                    .set("enable.auto.commit", "true")
                    .set("auto.offset.reset", "earliest")
                    .create()
                    .map_err(|e| connection_error(&e))?;
                consumer
                    .subscribe(&[config.topic.as_str()])
                    .map_err(|e| connection_error(&e))?;
                Ok(consumer)
            })
            .await?;
        info!(topic = %config.topic, group = %config.group_id, "kafka consumer subscribed");
        Ok(Self { consumer })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| TransportError::Receive(e.to_string()))?;
        Ok(message.payload().map(<[u8]>::to_vec).unwrap_or_default())
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.consumer.unsubscribe();
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "kafka"
    }
}
