use crate::unit::common::*;
use velostate::{compile_latest_state, InstanceState};

fn state_partition() -> TopicPartition {
    TopicPartition::new(STATE_TOPIC, 11)
}

async fn recover(
    source: &mut MemoryStateSource,
) -> Result<InstanceState<String, u64>, StateSinkError> {
    compile_latest_state(
        &state_partition(),
        source,
        &StringSerializer,
        &JsonSerializer,
        Utc::now(),
    )
    .await
}

#[tokio::test]
async fn test_later_records_overwrite_earlier_ones() {
    let mut source = MemoryStateSource::new(vec![
        put(0, "a", 1),
        put(1, "b", 1),
        put(2, "a", 2),
        put(3, "c", 9),
        put(4, "a", 3),
    ]);

    let state = recover(&mut source).await.unwrap();

    assert_eq!(state.len(), 3);
    assert_eq!(state.get("a"), Some(&3));
    assert_eq!(state.get("b"), Some(&1));
    assert_eq!(state.get("c"), Some(&9));
}

#[tokio::test]
async fn test_tombstone_removes_key() {
    let mut source = MemoryStateSource::new(vec![
        put(0, "a", 1),
        put(1, "b", 4),
        tombstone(2, "a"),
    ]);

    let state = recover(&mut source).await.unwrap();

    assert!(!state.contains_key("a"));
    assert_eq!(state.get("b"), Some(&4));
}

#[tokio::test]
async fn test_empty_partition_is_not_read() {
    let mut source = MemoryStateSource::new(vec![put(0, "stale", 1)]).with_cutoff(None);
    let reads = source.reads();

    let state = recover(&mut source).await.unwrap();

    assert!(state.is_empty());
    assert_eq!(*reads.lock().unwrap(), 0);
}

#[tokio::test]
async fn test_records_after_cutoff_are_ignored() {
    // Offsets 3 and 4 were written after recovery resolved its cutoff
    let mut source = MemoryStateSource::new(vec![
        put(0, "a", 1),
        put(1, "b", 1),
        put(2, "a", 2),
        put(3, "a", 100),
        put(4, "late", 1),
    ])
    .with_cutoff(Some(2));
    let reads = source.reads();

    let state = recover(&mut source).await.unwrap();

    assert_eq!(state.get("a"), Some(&2));
    assert!(!state.contains_key("late"));
    assert_eq!(*reads.lock().unwrap(), 3);
}

#[tokio::test]
async fn test_gap_at_cutoff_stops_at_first_later_record() {
    // The cutoff record was compacted away; the next record is beyond it and not folded
    let mut source =
        MemoryStateSource::new(vec![put(0, "a", 1), put(2, "a", 5)]).with_cutoff(Some(1));

    let state = recover(&mut source).await.unwrap();

    assert_eq!(state.get("a"), Some(&1));
}

#[tokio::test]
async fn test_end_of_partition_before_cutoff_ends_recovery() {
    let mut source = MemoryStateSource::new(vec![put(0, "a", 1)]).with_cutoff(Some(10));

    let state = recover(&mut source).await.unwrap();

    assert_eq!(state.get("a"), Some(&1));
}

#[tokio::test]
async fn test_undecodable_state_fails_recovery() {
    let mut source = MemoryStateSource::new(vec![
        put(0, "a", 1),
        StateRecord {
            offset: 1,
            key: Some(b"b".to_vec()),
            value: Some(b"not json".to_vec()),
        },
    ]);

    match recover(&mut source).await {
        Err(StateSinkError::RecoveryDeserialization {
            partition, offset, ..
        }) => {
            assert_eq!(partition, state_partition());
            assert_eq!(offset, 1);
        }
        other => panic!("Expected RecoveryDeserialization, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_record_without_key_fails_recovery() {
    let mut source = MemoryStateSource::new(vec![StateRecord {
        offset: 0,
        key: None,
        value: Some(b"1".to_vec()),
    }]);

    match recover(&mut source).await {
        Err(StateSinkError::RecoveryDeserialization {
            offset,
            source: SerializationError::MissingKey,
            ..
        }) => assert_eq!(offset, 0),
        other => panic!("Expected missing key error, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_transport_failure_fails_recovery() {
    let mut source = MemoryStateSource::new(vec![put(0, "a", 1)]).failing_reads();

    let err = recover(&mut source).await.unwrap_err();

    assert!(matches!(err, StateSinkError::RecoveryRead { .. }));
    assert_eq!(err.partition(), Some(&state_partition()));
}
