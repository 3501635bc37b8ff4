//! Grouping of a single-partition batch by key and concurrent per-key processing
//!
//! A batch arrives ordered by offset. Values are folded into one ordered sequence per key,
//! then the caller's transform runs once per key, all keys concurrently. The batch as a whole
//! commits at the offset of its last record, so one failing key fails the whole batch and
//! nothing is committed for it.

use crate::velostate::error::{BoxError, GroupingError};
use futures::future::try_join_all;
use log::debug;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;

/// One input record: instance key, value and its offset in the input partition
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedRecord<K, V> {
    pub key: K,
    pub value: V,
    pub offset: i64,
}

impl<K, V> KeyedRecord<K, V> {
    pub fn new(key: K, value: V, offset: i64) -> Self {
        Self { key, value, offset }
    }
}

/// Records of one input partition, ordered by increasing offset
pub type KeyedBatch<K, V> = Vec<KeyedRecord<K, V>>;

/// Result of processing one batch: one result per distinct key plus the batch commit offset
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedBatch<K, R>
where
    K: Eq + Hash,
{
    pub results: HashMap<K, R>,
    /// Offset of the last record of the batch, in input order
    pub commit_offset: i64,
}

impl<K, R> GroupedBatch<K, R>
where
    K: Eq + Hash,
{
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Fold an ordered batch into per-key value sequences.
///
/// Returns `None` for an empty batch, otherwise the groups together with the offset of the
/// last record. Values of one key keep their relative order.
pub fn group_by_key<K, V>(records: KeyedBatch<K, V>) -> Option<(HashMap<K, Vec<V>>, i64)>
where
    K: Eq + Hash,
{
    let commit_offset = records.last()?.offset;
    let mut groups: HashMap<K, Vec<V>> = HashMap::new();
    for record in records {
        groups.entry(record.key).or_default().push(record.value);
    }
    Some((groups, commit_offset))
}

/// Group `records` by key and run `transform` for every key concurrently.
///
/// Each key's values are delivered whole, in offset order, to a single invocation. An empty
/// batch yields `Ok(None)`; callers must not emit or commit anything for it. If any
/// invocation fails, the remaining ones are dropped and the batch fails as a whole.
pub async fn group_and_process<K, V, R, E, F, Fut>(
    records: KeyedBatch<K, V>,
    transform: F,
) -> Result<Option<GroupedBatch<K, R>>, GroupingError>
where
    K: Eq + Hash + Clone + Debug,
    F: Fn(K, Vec<V>) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: Into<BoxError>,
{
    let Some((groups, commit_offset)) = group_by_key(records) else {
        return Ok(None);
    };
    debug!(
        "Processing {} keys for batch ending at offset {}",
        groups.len(),
        commit_offset
    );

    let transform = &transform;
    let per_key = groups.into_iter().map(|(key, values)| async move {
        match transform(key.clone(), values).await {
            Ok(result) => Ok((key, result)),
            Err(e) => Err(GroupingError::KeyProcessingFailed {
                key: format!("{:?}", key),
                commit_offset,
                source: e.into(),
            }),
        }
    });
    let results = try_join_all(per_key).await?;

    Ok(Some(GroupedBatch {
        results: results.into_iter().collect(),
        commit_offset,
    }))
}
