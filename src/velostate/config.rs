//! Configuration of a stateful sink deployment

use crate::velostate::error::PartitionMappingError;
use crate::velostate::kafka::ClientConfigBuilder;
use crate::velostate::partition::TopicPartition;
use crate::velostate::sink::StateTopicLayout;
use rdkafka::config::ClientConfig;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Settings shared by every sink of one processing job.
///
/// Partition counts must match the actual input and state topics. Changing either count
/// moves every input partition's state to a different state partition; snapshots are not
/// migrated.
#[derive(Debug, Clone)]
pub struct StatefulSinkConfig {
    /// Bootstrap servers, e.g. `broker-1:9092,broker-2:9092`
    pub brokers: String,
    pub client_id: Option<String>,
    /// Extra librdkafka properties for both clients (security, tuning)
    pub client_properties: BTreeMap<String, String>,
    /// Compacted topic holding per-key state
    pub state_topic: String,
    pub input_partitions: i32,
    pub state_partitions: i32,
    /// Prefix of each sink's `transactional.id`
    pub transactional_id_prefix: String,
    /// Broker-side transaction timeout (`transaction.timeout.ms`)
    pub transaction_timeout: Duration,
    /// Bound for blocking client calls: init, commit, abort and offset lookups
    pub operation_timeout: Duration,
    /// Upper bound on recovery; unbounded when `None`
    pub recovery_timeout: Option<Duration>,
    /// Group id of the recovery reader; a fresh UUID is used when `None`
    pub recovery_reader_id: Option<String>,
}

impl Default for StatefulSinkConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            client_id: None,
            client_properties: BTreeMap::new(),
            state_topic: "velostate-state".to_string(),
            input_partitions: 1,
            state_partitions: 1,
            transactional_id_prefix: "velostate".to_string(),
            transaction_timeout: Duration::from_secs(60),
            operation_timeout: Duration::from_secs(30),
            recovery_timeout: None,
            recovery_reader_id: None,
        }
    }
}

impl StatefulSinkConfig {
    pub fn new(
        brokers: impl Into<String>,
        state_topic: impl Into<String>,
        input_partitions: i32,
        state_partitions: i32,
    ) -> Self {
        Self {
            brokers: brokers.into(),
            state_topic: state_topic.into(),
            input_partitions,
            state_partitions,
            ..Default::default()
        }
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn transactional_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.transactional_id_prefix = prefix.into();
        self
    }

    pub fn transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = Some(timeout);
        self
    }

    pub fn recovery_reader_id(mut self, id: impl Into<String>) -> Self {
        self.recovery_reader_id = Some(id.into());
        self
    }

    /// Add a client property applied to both the recovery reader and the producer
    pub fn custom_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.client_properties.insert(key.into(), value.into());
        self
    }

    pub fn state_topic_layout(&self) -> Result<StateTopicLayout, PartitionMappingError> {
        StateTopicLayout::new(
            self.state_topic.as_str(),
            self.input_partitions,
            self.state_partitions,
        )
    }

    /// `transactional.id` of the sink owning `input`; stable across restarts
    pub fn transactional_id(&self, input: &TopicPartition) -> String {
        format!("{}-{}", self.transactional_id_prefix, input)
    }

    pub fn resolve_recovery_reader_id(&self) -> String {
        self.recovery_reader_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    fn connection(&self) -> ClientConfigBuilder {
        ClientConfigBuilder::new().connection(
            &self.brokers,
            self.client_id.as_deref(),
            &self.client_properties,
        )
    }

    /// Client configuration of the transactional producer, without `transactional.id`
    pub fn producer_client_config(&self) -> ClientConfig {
        self.connection()
            .transactional_producer(self.transaction_timeout)
            .build()
    }

    /// Client configuration of a recovery reader
    pub fn recovery_client_config(&self, reader_id: &str) -> ClientConfig {
        self.connection().recovery_reader(reader_id).build()
    }
}
