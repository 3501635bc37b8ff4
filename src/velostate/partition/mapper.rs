//! Mapping between input partitions and state topic partitions
//!
//! The input topic and the state topic have independent partition counts. Each source
//! partition `p` owns the destination partitions
//! `{ (p + i * source_count) mod dest_count | i in [0, k) }` with
//! `k = ceil(dest_count / source_count)`. Writes go to exactly one of them, picked by
//! hashing the source partition identity, so the same destination is chosen again after a
//! restart without any bookkeeping.
//!
//! Changing either partition count changes the mapping. Previously written snapshots are
//! not migrated.

use super::TopicPartition;
use crate::velostate::error::PartitionMappingError;
use std::collections::BTreeMap;

/// Number of destination partitions each source partition may own: `ceil(dest / source)`.
///
/// Both counts must be positive.
pub fn count_destination_partitions_per_source(
    source_count: i32,
    dest_count: i32,
) -> Result<i32, PartitionMappingError> {
    check_counts(source_count, dest_count)?;
    Ok(ceil_div(dest_count, source_count))
}

fn check_counts(source_count: i32, dest_count: i32) -> Result<(), PartitionMappingError> {
    if source_count <= 0 {
        return Err(PartitionMappingError::InvalidPartitionCount {
            role: "source",
            count: source_count,
        });
    }
    if dest_count <= 0 {
        return Err(PartitionMappingError::InvalidPartitionCount {
            role: "destination",
            count: dest_count,
        });
    }
    Ok(())
}

/// Positive operands only; the result never exceeds `dividend`
fn ceil_div(dividend: i32, divisor: i32) -> i32 {
    ((dividend as i64 + divisor as i64 - 1) / divisor as i64) as i32
}

/// Pure mapping from source partitions onto destination partitions for fixed partition counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionMapper {
    source_count: i32,
    dest_count: i32,
}

impl PartitionMapper {
    pub fn new(source_count: i32, dest_count: i32) -> Result<Self, PartitionMappingError> {
        check_counts(source_count, dest_count)?;
        Ok(Self {
            source_count,
            dest_count,
        })
    }

    pub fn source_count(&self) -> i32 {
        self.source_count
    }

    pub fn dest_count(&self) -> i32 {
        self.dest_count
    }

    pub fn destinations_per_source(&self) -> i32 {
        ceil_div(self.dest_count, self.source_count)
    }

    /// Every destination partition `source_partition` may write to or read from.
    pub fn project(&self, source_partition: i32) -> Result<Vec<i32>, PartitionMappingError> {
        self.check_source(source_partition)?;
        Ok((0..self.destinations_per_source())
            .map(|i| self.destination_at(source_partition, i))
            .collect())
    }

    /// [`project`](Self::project) over several partitions; fails on the first invalid entry.
    pub fn project_all(
        &self,
        source_partitions: &[i32],
    ) -> Result<BTreeMap<i32, Vec<i32>>, PartitionMappingError> {
        source_partitions
            .iter()
            .map(|&partition| Ok((partition, self.project(partition)?)))
            .collect()
    }

    /// The single destination partition that `source` writes its state to.
    ///
    /// The routing key is the rendered `{topic}-{partition}` identity hashed with Kafka's
    /// murmur2; the hash picks one member of [`project`](Self::project).
    pub fn map_single(&self, source: &TopicPartition) -> Result<i32, PartitionMappingError> {
        self.check_source(source.partition)?;
        let hash = to_positive(murmur2(source.to_string().as_bytes()));
        let index = (hash % self.destinations_per_source() as u32) as i32;
        Ok(self.destination_at(source.partition, index))
    }

    /// [`map_single`](Self::map_single) over several partitions; fails on the first invalid entry.
    pub fn map_all(
        &self,
        sources: &[TopicPartition],
    ) -> Result<BTreeMap<TopicPartition, i32>, PartitionMappingError> {
        sources
            .iter()
            .map(|source| Ok((source.clone(), self.map_single(source)?)))
            .collect()
    }

    fn check_source(&self, source_partition: i32) -> Result<(), PartitionMappingError> {
        if source_partition < 0 || source_partition >= self.source_count {
            return Err(PartitionMappingError::PartitionOutOfRange {
                partition: source_partition,
                max: self.source_count,
            });
        }
        Ok(())
    }

    fn destination_at(&self, source_partition: i32, index: i32) -> i32 {
        // i64 so large counts cannot overflow before the modulo
        let slot = source_partition as i64 + index as i64 * self.source_count as i64;
        (slot % self.dest_count as i64) as i32
    }
}

/// Kafka's `Utils.toPositive`
fn to_positive(hash: u32) -> u32 {
    hash & 0x7fff_ffff
}

/// Murmur2 hash function compatible with Kafka's `DefaultPartitioner`.
///
/// This is the 32-bit version used by Kafka for key-based partitioning.
pub(crate) fn murmur2(data: &[u8]) -> u32 {
    let seed: u32 = 0x9747_b28c;
    let m: u32 = 0x5bd1_e995;
    let r: u32 = 24;

    let len = data.len();
    let mut h: u32 = seed ^ (len as u32);

    let chunks = len / 4;
    for i in 0..chunks {
        let offset = i * 4;
        let mut k = u32::from_le_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]);
        k = k.wrapping_mul(m);
        k ^= k >> r;
        k = k.wrapping_mul(m);
        h = h.wrapping_mul(m);
        h ^= k;
    }

    let remainder = len % 4;
    let tail_start = chunks * 4;
    if remainder >= 3 {
        h ^= u32::from(data[tail_start + 2]) << 16;
    }
    if remainder >= 2 {
        h ^= u32::from(data[tail_start + 1]) << 8;
    }
    if remainder >= 1 {
        h ^= u32::from(data[tail_start]);
        h = h.wrapping_mul(m);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(m);
    h ^= h >> 15;

    h
}
