pub mod config;
pub mod consumer;
pub mod factory;
pub mod memory;
pub mod observer;
pub mod pool;
pub mod producer;
pub mod reconnect;
pub mod retry;

#[cfg(feature = "amqp")]
pub mod amqp;
#[cfg(feature = "kafka")]
pub mod kafka;

pub use config::{BrokerConfig, BrokerKind, ReconnectConfig};
pub use consumer::{BrokerConsumer, ConsumerStatsSnapshot, EmailConsumer, MessageSource};
pub use factory::{build_consumer, build_producer};
pub use memory::{MemoryBroker, MemoryProducer, MemorySource};
pub use observer::{ChannelObserver, CountingObserver, EmailSentEvent, EmailSentObserver};
pub use pool::{ConsumerFactory, ConsumerPool};
pub use producer::EmailProducer;
pub use reconnect::{ConnectionState, Dialer, Reconnector, Redialing, Subscription};
pub use retry::RetryStrategy;

#[cfg(feature = "amqp")]
pub use amqp::{
    AmqpConnection, AmqpDialer, AmqpProducer, AmqpSource, AmqpSubscriber, AmqpTopology,
};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaProducer, KafkaSource};
