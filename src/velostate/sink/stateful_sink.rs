//! Per-partition stateful sink: recovery at acquisition, then atomic transactional emits.

use super::batch::ProcessedBatch;
use super::instance_state::InstanceState;
use super::recovery::{compile_latest_state, RecoverySource};
use super::records::{ProducerRecord, RecordsBuilder};
use super::transaction::TransactionalProducer;
use crate::velostate::config::StatefulSinkConfig;
use crate::velostate::error::{PartitionMappingError, StateSinkError, TransactionStage};
use crate::velostate::kafka::{KafkaRecoveryReader, KafkaTransactionalProducer};
use crate::velostate::partition::{PartitionMapper, TopicPartition};
use crate::velostate::serialization::{SerializationError, Serializer};
use chrono::Utc;
use log::{debug, error, info};
use rdkafka::consumer::ConsumerGroupMetadata;
use rdkafka::error::KafkaError;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Name and partition mapping of the compacted state topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTopicLayout {
    topic: String,
    mapper: PartitionMapper,
}

impl StateTopicLayout {
    pub fn new(
        topic: impl Into<String>,
        input_partitions: i32,
        state_partitions: i32,
    ) -> Result<Self, PartitionMappingError> {
        Ok(Self {
            topic: topic.into(),
            mapper: PartitionMapper::new(input_partitions, state_partitions)?,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn mapper(&self) -> &PartitionMapper {
        &self.mapper
    }

    /// State partition holding the snapshots of `input`
    pub fn state_partition_for(
        &self,
        input: &TopicPartition,
    ) -> Result<TopicPartition, PartitionMappingError> {
        Ok(TopicPartition::new(
            self.topic.as_str(),
            self.mapper.map_single(input)?,
        ))
    }
}

/// Codecs for instance keys and state, plus the builder for derived output records.
pub struct SinkCodecs<KS, SS, O> {
    pub key_serde: KS,
    pub state_serde: SS,
    records_builder: Box<dyn RecordsBuilder<O>>,
}

impl<KS, SS, O> SinkCodecs<KS, SS, O> {
    pub fn new(
        key_serde: KS,
        state_serde: SS,
        records_builder: impl RecordsBuilder<O> + 'static,
    ) -> Self {
        Self {
            key_serde,
            state_serde,
            records_builder: Box::new(records_builder),
        }
    }
}

/// What one successful emit wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitSummary {
    pub state_records: usize,
    pub output_records: usize,
    /// Consumer offset committed for the input partition (last processed + 1)
    pub committed_offset: i64,
}

/// Owns one input partition: its recovered state and its transactional identity.
///
/// Callers process batches of the partition serially and hand each result to [`emit`].
/// The state returned by [`latest_state`] is the snapshot taken at acquisition; emits do not
/// update it.
///
/// [`emit`]: StatefulSink::emit
/// [`latest_state`]: StatefulSink::latest_state
pub struct StatefulSink<K, S, O, KS, SS, P = KafkaTransactionalProducer>
where
    K: Eq + Hash,
{
    input: TopicPartition,
    state_partition: TopicPartition,
    latest_state: InstanceState<K, S>,
    codecs: SinkCodecs<KS, SS, O>,
    producer: P,
    last_emitted: Option<i64>,
}

impl<K, S, O, KS, SS, P> StatefulSink<K, S, O, KS, SS, P>
where
    K: Eq + Hash,
    KS: Serializer<K>,
    SS: Serializer<S>,
    P: TransactionalProducer,
{
    /// Recover the state of `input` and take ownership of it.
    ///
    /// `open_reader` receives the mapped state partition and returns the reader to recover
    /// from; it is dropped once recovery finishes. `producer` must already be fenced for the
    /// partition's transactional identity.
    pub async fn acquire<R, F>(
        layout: &StateTopicLayout,
        input: TopicPartition,
        codecs: SinkCodecs<KS, SS, O>,
        open_reader: F,
        producer: P,
        recovery_timeout: Option<Duration>,
    ) -> Result<Self, StateSinkError>
    where
        R: RecoverySource,
        F: FnOnce(&TopicPartition) -> Result<R, StateSinkError>,
    {
        let state_partition = layout.state_partition_for(&input)?;
        info!(
            "StatefulSink[{}]: Recovering state from {}",
            input, state_partition
        );

        let mut reader = open_reader(&state_partition)?;
        let recovery = compile_latest_state(
            &state_partition,
            &mut reader,
            &codecs.key_serde,
            &codecs.state_serde,
            Utc::now(),
        );
        let latest_state = match recovery_timeout {
            Some(timeout) => tokio::time::timeout(timeout, recovery)
                .await
                .map_err(|_| StateSinkError::RecoveryTimedOut {
                    partition: state_partition.clone(),
                    timeout,
                })??,
            None => recovery.await?,
        };
        drop(reader);

        info!(
            "StatefulSink[{}]: Recovered {} keys from {}",
            input,
            latest_state.len(),
            state_partition
        );
        Ok(Self {
            input,
            state_partition,
            latest_state,
            codecs,
            producer,
            last_emitted: None,
        })
    }

    pub fn input_partition(&self) -> &TopicPartition {
        &self.input
    }

    pub fn state_partition(&self) -> &TopicPartition {
        &self.state_partition
    }

    /// State per key as recovered at acquisition
    pub fn latest_state(&self) -> &InstanceState<K, S> {
        &self.latest_state
    }

    /// Commit offset of the last successful emit, if any
    pub fn last_emitted_offset(&self) -> Option<i64> {
        self.last_emitted
    }

    /// Write the batch's state, its outputs and the input offset commit as one transaction.
    ///
    /// Every record is encoded before the transaction begins, so an encoding failure writes
    /// nothing. Once begun, any failure aborts the transaction and the batch may be retried
    /// from the same uncommitted offset.
    pub async fn emit(
        &mut self,
        batch: ProcessedBatch<K, S, O>,
    ) -> Result<EmitSummary, StateSinkError> {
        let offset = batch.commit_offset;
        if let Some(last_emitted) = self.last_emitted {
            if offset <= last_emitted {
                return Err(StateSinkError::StaleCommitOffset {
                    partition: self.input.clone(),
                    offset,
                    last_emitted,
                });
            }
        }

        let encoding_error = |source: SerializationError| StateSinkError::Serialization {
            partition: self.input.clone(),
            offset,
            source,
        };
        let mut records = self.encode_states(&batch.states).map_err(encoding_error)?;
        let state_records = records.len();
        records.extend(self.encode_outputs(&batch.outputs).map_err(encoding_error)?);

        let summary = EmitSummary {
            state_records,
            output_records: records.len() - state_records,
            committed_offset: offset + 1,
        };
        debug!(
            "StatefulSink[{}]: Emitting {} state and {} output records, committing offset {}",
            self.input, summary.state_records, summary.output_records, summary.committed_offset
        );

        self.producer
            .begin_transaction()
            .await
            .map_err(|source| StateSinkError::Transaction {
                partition: self.input.clone(),
                offset,
                stage: TransactionStage::Begin,
                source,
            })?;

        if let Err((stage, source)) = self
            .write_transaction(records, summary.committed_offset)
            .await
        {
            error!(
                "StatefulSink[{}]: Transaction at offset {} failed during {}: {}, aborting",
                self.input, offset, stage, source
            );
            if let Err(abort_err) = self.producer.abort_transaction().await {
                error!(
                    "StatefulSink[{}]: Abort after failed {} also failed: {}",
                    self.input, stage, abort_err
                );
            }
            return Err(StateSinkError::Transaction {
                partition: self.input.clone(),
                offset,
                stage,
                source,
            });
        }

        self.last_emitted = Some(offset);
        Ok(summary)
    }

    async fn write_transaction(
        &mut self,
        records: Vec<ProducerRecord>,
        next_offset: i64,
    ) -> Result<(), (TransactionStage, KafkaError)> {
        for record in records {
            self.producer
                .send(record)
                .await
                .map_err(|e| (TransactionStage::Send, e))?;
        }
        self.producer
            .send_offsets_to_transaction(vec![(self.input.clone(), next_offset)])
            .await
            .map_err(|e| (TransactionStage::SendOffsets, e))?;
        self.producer
            .commit_transaction()
            .await
            .map_err(|e| (TransactionStage::Commit, e))
    }

    /// State records go to the mapped state partition explicitly; `None` becomes a tombstone
    fn encode_states(
        &self,
        states: &HashMap<K, Option<S>>,
    ) -> Result<Vec<ProducerRecord>, SerializationError> {
        states
            .iter()
            .map(|(key, state)| {
                let record = ProducerRecord::to(self.state_partition.topic.as_str())
                    .partition(self.state_partition.partition)
                    .key(self.codecs.key_serde.serialize(key)?);
                Ok(match state {
                    Some(state) => record.payload(self.codecs.state_serde.serialize(state)?),
                    None => record,
                })
            })
            .collect()
    }

    fn encode_outputs(&self, outputs: &[O]) -> Result<Vec<ProducerRecord>, SerializationError> {
        let mut records = Vec::new();
        for output in outputs {
            records.extend(self.codecs.records_builder.build(output)?);
        }
        Ok(records)
    }
}

impl<K, S, O, KS, SS> StatefulSink<K, S, O, KS, SS, KafkaTransactionalProducer>
where
    K: Eq + Hash,
    KS: Serializer<K>,
    SS: Serializer<S>,
{
    /// Acquire `input` against a Kafka cluster.
    ///
    /// Transactions are initialised first, fencing any older sink for the same partition,
    /// then state is recovered with a throwaway reader. `group_metadata` belongs to the
    /// consumer that reads `input`; offsets are committed on its behalf.
    pub async fn connect(
        config: &StatefulSinkConfig,
        input: TopicPartition,
        group_metadata: ConsumerGroupMetadata,
        codecs: SinkCodecs<KS, SS, O>,
    ) -> Result<Self, StateSinkError> {
        let layout = config.state_topic_layout()?;
        layout.state_partition_for(&input)?;

        let transactional_id = config.transactional_id(&input);
        let producer = KafkaTransactionalProducer::start(
            config.producer_client_config(),
            &transactional_id,
            group_metadata,
            config.operation_timeout,
        )
        .await
        .map_err(|source| StateSinkError::ClientSetup {
            partition: input.clone(),
            source,
        })?;

        let reader_id = config.resolve_recovery_reader_id();
        debug!(
            "StatefulSink[{}]: Recovery reader id '{}'",
            input, reader_id
        );
        let reader_config = config.recovery_client_config(&reader_id);
        let metadata_timeout = config.operation_timeout;

        Self::acquire(
            &layout,
            input,
            codecs,
            |state_partition| {
                KafkaRecoveryReader::open(&reader_config, state_partition, metadata_timeout)
                    .map_err(|source| StateSinkError::ClientSetup {
                        partition: state_partition.clone(),
                        source,
                    })
            },
            producer,
            config.recovery_timeout,
        )
        .await
    }
}
