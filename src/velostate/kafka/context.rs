use log::{error, warn};
use rdkafka::config::RDKafkaLogLevel;
use rdkafka::consumer::ConsumerContext;
use rdkafka::error::KafkaError;
use rdkafka::message::DeliveryResult;
use rdkafka::producer::ProducerContext;
use rdkafka::{ClientContext, Message};

pub fn convert_kafka_log_level(kafka_level: RDKafkaLogLevel) -> log::Level {
    match kafka_level {
        RDKafkaLogLevel::Emerg | RDKafkaLogLevel::Alert | RDKafkaLogLevel::Critical => {
            log::Level::Error
        }
        RDKafkaLogLevel::Error => log::Level::Error,
        RDKafkaLogLevel::Warning => log::Level::Warn,
        RDKafkaLogLevel::Notice | RDKafkaLogLevel::Info => log::Level::Info,
        RDKafkaLogLevel::Debug => log::Level::Debug,
    }
}

/// Client context that forwards librdkafka logs and errors to the `log` facade.
///
/// Shared by the recovery reader and the transactional producer; `label` tells their log
/// lines apart.
pub struct LoggingClientContext {
    label: String,
}

impl LoggingClientContext {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ClientContext for LoggingClientContext {
    fn log(&self, level: RDKafkaLogLevel, fac: &str, message: &str) {
        log::log!(
            convert_kafka_log_level(level),
            "Kafka log [{}] ({}): {}",
            self.label,
            fac,
            message
        );
    }

    fn error(&self, error: KafkaError, reason: &str) {
        error!(
            "Kafka client error [{}]: {:?}, reason: {}",
            self.label, error, reason
        );
    }
}

impl ConsumerContext for LoggingClientContext {}

impl ProducerContext for LoggingClientContext {
    type DeliveryOpaque = ();

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, _delivery_opaque: Self::DeliveryOpaque) {
        // The transaction commit reports the failure; this only records which record it was
        if let Err((err, message)) = delivery_result {
            warn!(
                "Delivery failed [{}] to {}-{}: {}",
                self.label,
                message.topic(),
                message.partition(),
                err
            );
        }
    }
}
