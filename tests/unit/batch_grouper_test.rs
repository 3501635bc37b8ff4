use crate::unit::common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Barrier;
use velostate::GroupingError;

fn record(key: &str, value: u32, offset: i64) -> KeyedRecord<String, u32> {
    KeyedRecord::new(key.to_string(), value, offset)
}

#[tokio::test]
async fn test_each_key_sees_its_values_in_offset_order() {
    let batch = vec![
        record("a", 1, 100),
        record("b", 10, 101),
        record("a", 2, 102),
        record("c", 7, 103),
        record("b", 11, 104),
        record("a", 3, 105),
    ];
    let invocations = AtomicUsize::new(0);

    let grouped = group_and_process(batch, |key: String, values: Vec<u32>| {
        invocations.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, std::io::Error>((key, values)) }
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert_eq!(grouped.len(), 3);
    assert_eq!(grouped.commit_offset, 105);
    assert_eq!(grouped.results["a"].1, vec![1, 2, 3]);
    assert_eq!(grouped.results["b"].1, vec![10, 11]);
    assert_eq!(grouped.results["c"].1, vec![7]);
    assert_eq!(grouped.results["b"].0, "b");
}

#[tokio::test]
async fn test_empty_batch_yields_nothing() {
    let invocations = AtomicUsize::new(0);
    let grouped = group_and_process(Vec::new(), |_key: String, _values: Vec<u32>| {
        invocations.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, std::io::Error>(()) }
    })
    .await
    .unwrap();

    assert!(grouped.is_none());
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_keys_are_processed_concurrently() {
    // Every key waits for all the others; sequential processing would never finish
    let barrier = Arc::new(Barrier::new(3));
    let batch = vec![record("a", 1, 0), record("b", 1, 1), record("c", 1, 2)];

    let processing = group_and_process(batch, |key: String, _values: Vec<u32>| {
        let barrier = Arc::clone(&barrier);
        async move {
            barrier.wait().await;
            Ok::<_, std::io::Error>(key)
        }
    });
    let grouped = tokio::time::timeout(Duration::from_secs(5), processing)
        .await
        .expect("keys were not processed concurrently")
        .unwrap()
        .unwrap();

    assert_eq!(grouped.len(), 3);
}

#[tokio::test]
async fn test_one_failing_key_fails_the_batch() {
    let batch = vec![record("good", 1, 7), record("bad", 2, 8), record("good", 3, 9)];

    let result = group_and_process(batch, |key: String, _values: Vec<u32>| async move {
        if key == "bad" {
            Err(format!("cannot process {key}"))
        } else {
            Ok(key.len())
        }
    })
    .await;

    match result {
        Err(GroupingError::KeyProcessingFailed {
            key,
            commit_offset,
            source,
        }) => {
            assert!(key.contains("bad"));
            assert_eq!(commit_offset, 9);
            assert_eq!(source.to_string(), "cannot process bad");
        }
        other => panic!("Expected KeyProcessingFailed, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_grouped_updates_become_processed_batch() {
    let batch = vec![
        KeyedRecord::new("a".to_string(), 2u64, 0),
        KeyedRecord::new("gone".to_string(), 0u64, 1),
        KeyedRecord::new("a".to_string(), 3u64, 2),
    ];

    let grouped = group_and_process(batch, |key: String, values: Vec<u64>| async move {
        let update = if key == "gone" {
            StateUpdate::delete()
        } else {
            let total: u64 = values.iter().sum();
            StateUpdate::set(total).with_output((key, total))
        };
        Ok::<_, std::io::Error>(update)
    })
    .await
    .unwrap()
    .unwrap();

    let processed: ProcessedBatch<String, u64, (String, u64)> = grouped.into_processed();
    assert_eq!(processed.commit_offset, 2);
    assert_eq!(processed.states["a"], Some(5));
    assert_eq!(processed.states["gone"], None);
    assert_eq!(processed.outputs, vec![("a".to_string(), 5)]);
}
