//! Kafka adapters for the stateful sink: client configuration, the recovery reader and the
//! transactional producer.

pub mod address_family;
pub mod client_config_builder;
pub mod context;
mod recovery_reader;
mod transactional_producer;

pub use address_family::{BrokerAddressFamily, BROKER_ADDRESS_FAMILY_ENV};
pub use client_config_builder::ClientConfigBuilder;
pub use context::{convert_kafka_log_level, LoggingClientContext};
pub use recovery_reader::KafkaRecoveryReader;
pub use transactional_producer::KafkaTransactionalProducer;
