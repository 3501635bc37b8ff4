mod mapper;
mod topic_partition;

pub use mapper::{count_destination_partitions_per_source, PartitionMapper};
pub use topic_partition::TopicPartition;
