//! Error types for partition mapping, batch grouping and the stateful sink
//!
//! Every variant carries the partition and offset context that was available where the
//! failure happened, so callers can report it and decide whether to retry the batch from
//! the same uncommitted offset or halt the partition.

use crate::velostate::partition::TopicPartition;
use crate::velostate::serialization::SerializationError;
use rdkafka::error::KafkaError;
use std::fmt;
use std::time::Duration;

/// Boxed error used for opaque, caller-supplied collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Invalid input to the partition mapper.
///
/// These are configuration or programming errors and are never retried internally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartitionMappingError {
    /// Source partition index is negative or not below the configured source partition count
    #[error("Source partition {partition} is out of range: source topic has {max} partitions")]
    PartitionOutOfRange { partition: i32, max: i32 },

    /// A partition count was zero or negative
    #[error("Invalid {role} partition count {count}: must be positive")]
    InvalidPartitionCount { role: &'static str, count: i32 },
}

/// Failure of the per-key processing step of a batch.
#[derive(Debug, thiserror::Error)]
pub enum GroupingError {
    /// The caller-supplied transform failed for one key; the whole batch is discarded
    #[error("Processing failed for key {key} in batch ending at offset {commit_offset}")]
    KeyProcessingFailed {
        key: String,
        commit_offset: i64,
        #[source]
        source: BoxError,
    },
}

/// Step of the transactional write that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStage {
    Begin,
    Send,
    SendOffsets,
    Commit,
}

impl fmt::Display for TransactionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStage::Begin => "begin",
            TransactionStage::Send => "send",
            TransactionStage::SendOffsets => "send offsets",
            TransactionStage::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Errors raised while acquiring a [`StatefulSink`](crate::StatefulSink) or emitting through it.
#[derive(Debug, thiserror::Error)]
pub enum StateSinkError {
    /// The input partition could not be mapped onto the state topic
    #[error("Partition mapping failed: {0}")]
    Mapping(#[from] PartitionMappingError),

    /// Creating or configuring a Kafka client failed
    #[error("Kafka client setup failed for {partition}: {source}")]
    ClientSetup {
        partition: TopicPartition,
        #[source]
        source: KafkaError,
    },

    /// Reading the state partition failed during recovery
    #[error("Recovery read from state partition {partition} failed: {source}")]
    RecoveryRead {
        partition: TopicPartition,
        #[source]
        source: KafkaError,
    },

    /// A state record could not be decoded; the partition must not proceed with partial state
    #[error("Failed to decode state record at {partition} offset {offset}: {source}")]
    RecoveryDeserialization {
        partition: TopicPartition,
        offset: i64,
        #[source]
        source: SerializationError,
    },

    /// Recovery did not finish within the configured bound
    #[error("Recovery of state partition {partition} did not finish within {timeout:?}")]
    RecoveryTimedOut {
        partition: TopicPartition,
        timeout: Duration,
    },

    /// State or output records for a batch could not be encoded; nothing was written
    #[error("Failed to encode batch for {partition} at offset {offset}: {source}")]
    Serialization {
        partition: TopicPartition,
        offset: i64,
        #[source]
        source: SerializationError,
    },

    /// The transactional write failed and was aborted; none of its effects are visible
    #[error("Transaction for {partition} at offset {offset} failed during {stage}: {source}")]
    Transaction {
        partition: TopicPartition,
        offset: i64,
        stage: TransactionStage,
        #[source]
        source: KafkaError,
    },

    /// The batch would move the committed offset backwards or repeat it
    #[error(
        "Refusing to emit offset {offset} for {partition}: offset {last_emitted} was already emitted"
    )]
    StaleCommitOffset {
        partition: TopicPartition,
        offset: i64,
        last_emitted: i64,
    },
}

impl StateSinkError {
    /// Input or state partition the failure relates to, when known
    pub fn partition(&self) -> Option<&TopicPartition> {
        match self {
            StateSinkError::Mapping(_) => None,
            StateSinkError::ClientSetup { partition, .. }
            | StateSinkError::RecoveryRead { partition, .. }
            | StateSinkError::RecoveryDeserialization { partition, .. }
            | StateSinkError::RecoveryTimedOut { partition, .. }
            | StateSinkError::Serialization { partition, .. }
            | StateSinkError::Transaction { partition, .. }
            | StateSinkError::StaleCommitOffset { partition, .. } => Some(partition),
        }
    }
}
