//! Per-batch processing: grouping by instance key and concurrent per-key transforms

mod batch_grouper;

pub use batch_grouper::{group_and_process, group_by_key, GroupedBatch, KeyedBatch, KeyedRecord};
