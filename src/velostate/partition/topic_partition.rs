use std::fmt;

/// Identity of one partition of one topic.
///
/// Renders as `{topic}-{partition}`; that rendering is the routing key hashed by
/// [`PartitionMapper::map_single`](super::PartitionMapper::map_single) and part of the
/// transactional id of the sink that owns the partition, so it must stay stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    /// Same topic name, different partition index
    pub fn with_partition(&self, partition: i32) -> Self {
        Self {
            topic: self.topic.clone(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}
