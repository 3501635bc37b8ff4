//! Bounded reader over one state-topic partition, used to rebuild instance state.

use super::context::LoggingClientContext;
use crate::velostate::partition::TopicPartition;
use crate::velostate::sink::{RecoverySource, StateRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Message, Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;

/// Consumer assigned to a single state partition from its beginning.
///
/// The client is expected to be configured with `isolation.level=read_committed` and
/// `enable.partition.eof=true`; end of partition is reported as the end of the record stream.
pub struct KafkaRecoveryReader {
    consumer: Arc<StreamConsumer<LoggingClientContext>>,
    partition: TopicPartition,
    metadata_timeout: Duration,
}

impl KafkaRecoveryReader {
    pub fn open(
        config: &ClientConfig,
        partition: &TopicPartition,
        metadata_timeout: Duration,
    ) -> KafkaResult<Self> {
        let consumer: StreamConsumer<LoggingClientContext> = config
            .create_with_context(LoggingClientContext::new(format!("recovery {}", partition)))?;

        let mut assignment = TopicPartitionList::new();
        assignment.add_partition_offset(&partition.topic, partition.partition, Offset::Beginning)?;
        consumer.assign(&assignment)?;
        debug!("KafkaRecoveryReader: Assigned {} from beginning", partition);

        Ok(Self {
            consumer: Arc::new(consumer),
            partition: partition.clone(),
            metadata_timeout,
        })
    }
}

/// Pick the last foldable offset from a timestamp lookup.
///
/// A concrete offset is used as is. When no record is at or after the timestamp the broker
/// answers with the log end, so every record present is older and the last one is the cutoff.
pub(crate) fn cutoff_from_lookup(resolved: Option<Offset>, high_watermark: i64) -> i64 {
    match resolved {
        Some(Offset::Offset(offset)) => offset,
        _ => high_watermark - 1,
    }
}

fn resolve_cutoff_blocking(
    consumer: &StreamConsumer<LoggingClientContext>,
    partition: &TopicPartition,
    at_millis: i64,
    timeout: Duration,
) -> KafkaResult<Option<i64>> {
    let (low, high) = consumer.fetch_watermarks(&partition.topic, partition.partition, timeout)?;
    if high <= low {
        return Ok(None);
    }

    let mut query = TopicPartitionList::new();
    query.add_partition_offset(&partition.topic, partition.partition, Offset::Offset(at_millis))?;
    let answer = consumer.offsets_for_times(query, timeout)?;
    let resolved = answer
        .find_partition(&partition.topic, partition.partition)
        .map(|entry| entry.offset());

    let cutoff = cutoff_from_lookup(resolved, high);
    debug!(
        "KafkaRecoveryReader: {} watermarks [{}, {}), lookup {:?}, cutoff {}",
        partition, low, high, resolved, cutoff
    );
    Ok(Some(cutoff))
}

#[async_trait]
impl RecoverySource for KafkaRecoveryReader {
    async fn resolve_cutoff(&mut self, at: DateTime<Utc>) -> Result<Option<i64>, KafkaError> {
        let consumer = Arc::clone(&self.consumer);
        let partition = self.partition.clone();
        let timeout = self.metadata_timeout;
        let at_millis = at.timestamp_millis();

        let cutoff = tokio::task::spawn_blocking(move || {
            resolve_cutoff_blocking(&consumer, &partition, at_millis, timeout)
        })
        .await
        .map_err(|e| {
            error!("KafkaRecoveryReader: Offset lookup task failed: {:?}", e);
            KafkaError::OffsetFetch(RDKafkaErrorCode::Fail)
        })??;

        if cutoff.is_none() {
            info!("KafkaRecoveryReader: {} is empty", self.partition);
        }
        Ok(cutoff)
    }

    async fn next_record(&mut self) -> Result<Option<StateRecord>, KafkaError> {
        match self.consumer.recv().await {
            Ok(message) => Ok(Some(StateRecord {
                offset: message.offset(),
                key: message.key().map(<[u8]>::to_vec),
                value: message.payload().map(<[u8]>::to_vec),
            })),
            Err(KafkaError::PartitionEOF(_)) => {
                debug!("KafkaRecoveryReader: Reached end of {}", self.partition);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
