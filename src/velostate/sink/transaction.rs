use super::records::ProducerRecord;
use crate::velostate::partition::TopicPartition;
use async_trait::async_trait;
use rdkafka::error::KafkaError;

/// Transactional write path used by [`StatefulSink::emit`](super::StatefulSink::emit).
///
/// Implementations own one fenced transactional identity. Records sent between
/// `begin_transaction` and `commit_transaction` become visible to `read_committed` readers
/// together with the offsets passed to `send_offsets_to_transaction`, or not at all.
#[async_trait]
pub trait TransactionalProducer: Send {
    async fn begin_transaction(&mut self) -> Result<(), KafkaError>;

    async fn send(&mut self, record: ProducerRecord) -> Result<(), KafkaError>;

    /// Commit consumer offsets as part of the open transaction.
    ///
    /// Offsets are the next offset to consume, i.e. last processed + 1.
    async fn send_offsets_to_transaction(
        &mut self,
        offsets: Vec<(TopicPartition, i64)>,
    ) -> Result<(), KafkaError>;

    async fn commit_transaction(&mut self) -> Result<(), KafkaError>;

    /// Abort the open transaction; a no-op when none is open
    async fn abort_transaction(&mut self) -> Result<(), KafkaError>;
}
