//! # velostate
//!
//! Stateful, exactly-once stream processing on top of Apache Kafka. Each input partition
//! keeps per-key ("instance") state in a compacted state topic, recovers it on startup and
//! publishes new state, derived output records and the input offset commit as one Kafka
//! transaction.
//!
//! ## Features
//!
//! - **Partition-count independent routing**: input partitions map deterministically onto a
//!   differently sized state topic with Kafka's murmur2 hash
//! - **Bounded recovery**: latest state per key is rebuilt from the mapped state partition
//!   with a throwaway, group-less reader
//! - **Concurrent per-key processing**: a batch is grouped by key and every key is processed
//!   concurrently, preserving per-key order
//! - **Exactly-once emit**: state snapshots, output records and the consumer offset commit are
//!   written in a single transaction, fenced per input partition
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use velostate::{
//!     group_and_process, JsonSerializer, KeyValueRecordsBuilder, KeyedRecord, SinkCodecs,
//!     StateUpdate, StatefulSink, StatefulSinkConfig, StringSerializer, TopicPartition,
//! };
//! use rdkafka::consumer::{BaseConsumer, Consumer};
//! use rdkafka::ClientConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let consumer: BaseConsumer = ClientConfig::new()
//!         .set("bootstrap.servers", "localhost:9092")
//!         .set("group.id", "counters")
//!         .create()?;
//!     let group_metadata = consumer.group_metadata().ok_or("no group metadata")?;
//!
//!     let config = StatefulSinkConfig::new("localhost:9092", "counter-state", 4, 8);
//!     let codecs = SinkCodecs::new(
//!         StringSerializer,
//!         JsonSerializer,
//!         KeyValueRecordsBuilder::new("counts", StringSerializer, JsonSerializer),
//!     );
//!     let input = TopicPartition::new("clicks", 0);
//!     let mut sink: StatefulSink<String, u64, (String, u64), _, _> =
//!         StatefulSink::connect(&config, input, group_metadata, codecs).await?;
//!
//!     let batch = vec![
//!         KeyedRecord::new("a".to_string(), 1u64, 0),
//!         KeyedRecord::new("a".to_string(), 1u64, 1),
//!     ];
//!     let known = sink.latest_state().clone();
//!     let grouped = group_and_process(batch, |key: String, values: Vec<u64>| {
//!         let previous = known.get(&key).copied().unwrap_or(0);
//!         async move {
//!             let count = previous + values.iter().sum::<u64>();
//!             Ok::<_, std::io::Error>(StateUpdate::set(count).with_output((key, count)))
//!         }
//!     })
//!     .await?;
//!
//!     if let Some(grouped) = grouped {
//!         sink.emit(grouped.into_processed()).await?;
//!     }
//!     Ok(())
//! }
//! ```

#![allow(clippy::type_complexity)]

pub mod velostate;

// Re-export main API at crate root for easy access
pub use velostate::{
    config::StatefulSinkConfig,
    error::{BoxError, GroupingError, PartitionMappingError, StateSinkError, TransactionStage},
    kafka::{KafkaRecoveryReader, KafkaTransactionalProducer},
    partition::{count_destination_partitions_per_source, PartitionMapper, TopicPartition},
    processing::{group_and_process, GroupedBatch, KeyedBatch, KeyedRecord},
    serialization::{BytesSerializer, JsonSerializer, SerializationError, Serializer, StringSerializer},
    sink::{
        compile_latest_state, EmitSummary, InstanceState, KeyValueRecordsBuilder, ProcessedBatch,
        ProducerRecord, RecordsBuilder, RecoverySource, SinkCodecs, StateRecord,
        StateTopicLayout, StateUpdate, StatefulSink, TransactionalProducer,
    },
};
