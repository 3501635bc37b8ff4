//! Rebuilding instance state from a state partition.
//!
//! The state topic is compacted and keyed by instance key; the last record per key is its
//! state and a tombstone deletes it. Recovery folds records in offset order up to a cutoff
//! resolved once at the start, so state written after recovery began is never read. Records
//! compacted away between the cutoff lookup and the read are still a known race: if the
//! record at the cutoff disappears, reading stops at the end of the partition instead.

use super::instance_state::InstanceState;
use crate::velostate::error::StateSinkError;
use crate::velostate::partition::TopicPartition;
use crate::velostate::serialization::{SerializationError, Serializer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use rdkafka::error::KafkaError;
use std::hash::Hash;

/// Raw record read back from a state partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    /// `None` for a tombstone
    pub value: Option<Vec<u8>>,
}

/// Ordered, bounded access to one state partition.
#[async_trait]
pub trait RecoverySource: Send {
    /// Last offset recovery folds (inclusive) for a read starting at `at`.
    ///
    /// `None` means the partition holds no records and nothing is read.
    async fn resolve_cutoff(&mut self, at: DateTime<Utc>) -> Result<Option<i64>, KafkaError>;

    /// Next record in offset order, `None` once the end of the partition is reached
    async fn next_record(&mut self) -> Result<Option<StateRecord>, KafkaError>;
}

/// Fold the state partition into the latest state per key, as of `at`.
pub async fn compile_latest_state<K, S, KS, SS, R>(
    partition: &TopicPartition,
    source: &mut R,
    key_serde: &KS,
    state_serde: &SS,
    at: DateTime<Utc>,
) -> Result<InstanceState<K, S>, StateSinkError>
where
    K: Eq + Hash,
    KS: Serializer<K>,
    SS: Serializer<S>,
    R: RecoverySource + ?Sized,
{
    let read_error = |source: KafkaError| StateSinkError::RecoveryRead {
        partition: partition.clone(),
        source,
    };

    let mut state = InstanceState::new();
    let Some(cutoff) = source.resolve_cutoff(at).await.map_err(read_error)? else {
        info!("Recovery of {}: no state records, starting empty", partition);
        return Ok(state);
    };
    debug!("Recovery of {}: folding up to offset {}", partition, cutoff);

    let mut folded = 0usize;
    while let Some(record) = source.next_record().await.map_err(read_error)? {
        if record.offset > cutoff {
            break;
        }

        let decode_error = |source: SerializationError| StateSinkError::RecoveryDeserialization {
            partition: partition.clone(),
            offset: record.offset,
            source,
        };
        let key_bytes = record
            .key
            .as_deref()
            .ok_or(SerializationError::MissingKey)
            .map_err(decode_error)?;
        let key = key_serde.deserialize(key_bytes).map_err(decode_error)?;
        let value = record
            .value
            .as_deref()
            .map(|bytes| state_serde.deserialize(bytes))
            .transpose()
            .map_err(decode_error)?;

        state.apply(key, value);
        folded += 1;

        if record.offset >= cutoff {
            break;
        }
    }

    info!(
        "Recovery of {}: folded {} records into {} keys",
        partition,
        folded,
        state.len()
    );
    Ok(state)
}
