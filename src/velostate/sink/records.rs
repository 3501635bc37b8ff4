//! Conversion of caller outputs into transport records

use crate::velostate::serialization::{SerializationError, Serializer};

/// A record ready to be written by a [`TransactionalProducer`](super::TransactionalProducer).
///
/// `partition: None` leaves partition selection to the producer's partitioner. A missing
/// payload is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerRecord {
    pub topic: String,
    pub partition: Option<i32>,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

impl ProducerRecord {
    pub fn to(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: None,
            payload: None,
        }
    }

    pub fn partition(mut self, partition: i32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn key(mut self, key: Vec<u8>) -> Self {
        self.key = Some(key);
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn is_tombstone(&self) -> bool {
        self.payload.is_none()
    }
}

/// Turns one processing output into zero or more records for arbitrary topics.
///
/// Closures of the form `Fn(&O) -> Result<Vec<ProducerRecord>, SerializationError>` implement
/// this trait directly.
pub trait RecordsBuilder<O>: Send + Sync {
    fn build(&self, output: &O) -> Result<Vec<ProducerRecord>, SerializationError>;
}

impl<O, F> RecordsBuilder<O> for F
where
    F: Fn(&O) -> Result<Vec<ProducerRecord>, SerializationError> + Send + Sync,
{
    fn build(&self, output: &O) -> Result<Vec<ProducerRecord>, SerializationError> {
        self(output)
    }
}

/// Writes `(key, value)` outputs to a single topic, partitioned by the producer.
#[derive(Debug, Clone)]
pub struct KeyValueRecordsBuilder<KS, VS> {
    topic: String,
    key_serde: KS,
    value_serde: VS,
}

impl<KS, VS> KeyValueRecordsBuilder<KS, VS> {
    pub fn new(topic: impl Into<String>, key_serde: KS, value_serde: VS) -> Self {
        Self {
            topic: topic.into(),
            key_serde,
            value_serde,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl<K, V, KS, VS> RecordsBuilder<(K, V)> for KeyValueRecordsBuilder<KS, VS>
where
    KS: Serializer<K> + Send + Sync,
    VS: Serializer<V> + Send + Sync,
{
    fn build(&self, output: &(K, V)) -> Result<Vec<ProducerRecord>, SerializationError> {
        let (key, value) = output;
        Ok(vec![ProducerRecord::to(self.topic.as_str())
            .key(self.key_serde.serialize(key)?)
            .payload(self.value_serde.serialize(value)?)])
    }
}
