//! Stateful sink: state recovery from a compacted topic and exactly-once emission

mod batch;
mod instance_state;
mod records;
mod recovery;
mod stateful_sink;
mod transaction;

pub use batch::{ProcessedBatch, StateUpdate};
pub use instance_state::InstanceState;
pub use records::{KeyValueRecordsBuilder, ProducerRecord, RecordsBuilder};
pub use recovery::{compile_latest_state, RecoverySource, StateRecord};
pub use stateful_sink::{EmitSummary, SinkCodecs, StateTopicLayout, StatefulSink};
pub use transaction::TransactionalProducer;
