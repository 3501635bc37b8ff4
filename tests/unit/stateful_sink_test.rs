use crate::unit::common::*;

fn counts(batch: &[(&str, u64)], commit_offset: i64) -> ProcessedBatch<String, u64, (String, u64)> {
    batch.iter().fold(
        ProcessedBatch::new(commit_offset),
        |processed, (key, count)| {
            processed
                .with_state(key.to_string(), *count)
                .with_output((key.to_string(), *count))
        },
    )
}

fn decode_count(record: &ProducerRecord) -> (String, Option<u64>) {
    let key = String::from_utf8(record.key.clone().unwrap()).unwrap();
    let count = record
        .payload
        .as_deref()
        .map(|bytes| Serializer::<u64>::deserialize(&JsonSerializer, bytes).unwrap());
    (key, count)
}

// ---------------------------------------------------------------------------
// Acquisition
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_acquire_recovers_from_mapped_state_partition() {
    let producer = RecordingProducer::new();
    let source = MemoryStateSource::new(vec![put(0, "a", 1), put(1, "b", 2), put(2, "a", 3)]);
    let mut opened = None;

    let sink: CounterSink = StatefulSink::acquire(
        &layout(),
        input(),
        counter_codecs(),
        |partition| {
            opened = Some(partition.clone());
            Ok(source)
        },
        producer.clone(),
        None,
    )
    .await
    .unwrap();

    let expected = TopicPartition::new(STATE_TOPIC, 11);
    assert_eq!(opened, Some(expected.clone()));
    assert_eq!(sink.state_partition(), &expected);
    assert_eq!(sink.input_partition(), &input());
    assert_eq!(sink.latest_state().get("a"), Some(&3));
    assert_eq!(sink.latest_state().get("b"), Some(&2));
    assert_eq!(sink.last_emitted_offset(), None);
    assert_eq!(producer.log().begun, 0);
}

#[tokio::test]
async fn test_acquire_with_empty_state_partition() {
    let producer = RecordingProducer::new();
    let sink = acquire_counter(MemoryStateSource::empty(), &producer)
        .await
        .unwrap();

    assert!(sink.latest_state().is_empty());
}

#[tokio::test]
async fn test_acquire_rejects_unknown_input_partition() {
    let producer = RecordingProducer::new();
    let mut opened = false;

    let result: Result<CounterSink, _> = StatefulSink::acquire(
        &layout(),
        TopicPartition::new("orders", 4),
        counter_codecs(),
        |_| {
            opened = true;
            Ok(MemoryStateSource::empty())
        },
        producer,
        None,
    )
    .await;

    assert!(matches!(result, Err(StateSinkError::Mapping(_))));
    assert!(!opened, "no reader may be opened for an unmapped partition");
}

#[tokio::test]
async fn test_acquire_fails_on_corrupt_state() {
    let producer = RecordingProducer::new();
    let source = MemoryStateSource::new(vec![StateRecord {
        offset: 0,
        key: Some(b"a".to_vec()),
        value: Some(b"{".to_vec()),
    }]);

    let result = acquire_counter(source, &producer).await;

    assert!(matches!(
        result,
        Err(StateSinkError::RecoveryDeserialization { offset: 0, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_acquire_times_out_on_stalled_recovery() {
    let producer = RecordingProducer::new();
    let source = MemoryStateSource::new(vec![put(0, "a", 1)]).stalled();

    let result: Result<CounterSink, _> = StatefulSink::acquire(
        &layout(),
        input(),
        counter_codecs(),
        |_| Ok(source),
        producer,
        Some(Duration::from_secs(30)),
    )
    .await;

    match result {
        Err(StateSinkError::RecoveryTimedOut { partition, timeout }) => {
            assert_eq!(partition, TopicPartition::new(STATE_TOPIC, 11));
            assert_eq!(timeout, Duration::from_secs(30));
        }
        Err(other) => panic!("Expected RecoveryTimedOut, got: {:?}", other),
        Ok(_) => panic!("Expected RecoveryTimedOut, got a sink"),
    }
}

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_emit_writes_state_outputs_and_offset_together() {
    let producer = RecordingProducer::new();
    let mut sink = acquire_counter(MemoryStateSource::empty(), &producer)
        .await
        .unwrap();

    let summary = sink.emit(counts(&[("a", 2), ("b", 1)], 41)).await.unwrap();

    assert_eq!(summary.state_records, 2);
    assert_eq!(summary.output_records, 2);
    assert_eq!(summary.committed_offset, 42);
    assert_eq!(sink.last_emitted_offset(), Some(41));

    let log = producer.log();
    assert_eq!(log.begun, 1);
    assert_eq!(log.committed, 1);
    assert_eq!(log.aborted, 0);
    assert_eq!(log.committed_offsets, vec![(input(), 42)]);

    let state_records = log.durable_for(STATE_TOPIC);
    assert_eq!(state_records.len(), 2);
    assert!(state_records.iter().all(|r| r.partition == Some(11)));
    let mut decoded: Vec<_> = state_records.iter().map(decode_count).collect();
    decoded.sort();
    assert_eq!(
        decoded,
        vec![("a".to_string(), Some(2)), ("b".to_string(), Some(1))]
    );

    let outputs = log.durable_for(OUTPUT_TOPIC);
    assert_eq!(outputs.len(), 2);
    assert!(outputs.iter().all(|r| r.partition.is_none()));
}

#[tokio::test]
async fn test_emit_deletion_writes_tombstone() {
    let producer = RecordingProducer::new();
    let mut sink = acquire_counter(MemoryStateSource::new(vec![put(0, "a", 5)]), &producer)
        .await
        .unwrap();

    let batch = ProcessedBatch::new(7).with_deletion("a".to_string());
    let summary = sink.emit(batch).await.unwrap();

    assert_eq!(summary.state_records, 1);
    assert_eq!(summary.output_records, 0);
    let log = producer.log();
    let state_records = log.durable_for(STATE_TOPIC);
    assert_eq!(state_records.len(), 1);
    assert!(state_records[0].is_tombstone());
    assert_eq!(decode_count(&state_records[0]), ("a".to_string(), None));
}

#[tokio::test]
async fn test_emit_does_not_update_latest_state() {
    let producer = RecordingProducer::new();
    let mut sink = acquire_counter(MemoryStateSource::new(vec![put(0, "a", 5)]), &producer)
        .await
        .unwrap();

    sink.emit(counts(&[("a", 6), ("b", 1)], 3)).await.unwrap();

    assert_eq!(sink.latest_state().get("a"), Some(&5));
    assert!(!sink.latest_state().contains_key("b"));
}

#[tokio::test]
async fn test_failed_transaction_leaves_nothing_durable() {
    for stage in [
        TransactionStage::Begin,
        TransactionStage::Send,
        TransactionStage::SendOffsets,
        TransactionStage::Commit,
    ] {
        let producer = RecordingProducer::new();
        let mut sink = acquire_counter(MemoryStateSource::empty(), &producer)
            .await
            .unwrap();
        producer.fail_next(stage);

        let err = sink
            .emit(counts(&[("a", 1), ("b", 2)], 10))
            .await
            .unwrap_err();

        match err {
            StateSinkError::Transaction {
                partition,
                offset,
                stage: failed,
                ..
            } => {
                assert_eq!(partition, input());
                assert_eq!(offset, 10);
                assert_eq!(failed, stage);
            }
            other => panic!("Expected Transaction error for {stage}, got: {:?}", other),
        }

        let log = producer.log();
        assert!(log.durable_records.is_empty(), "{stage}: records leaked");
        assert!(log.committed_offsets.is_empty(), "{stage}: offset leaked");
        assert!(!log.in_transaction, "{stage}: transaction left open");
        let expected_aborts = if stage == TransactionStage::Begin { 0 } else { 1 };
        assert_eq!(log.aborted, expected_aborts, "{stage}");
        drop(log);
        assert_eq!(sink.last_emitted_offset(), None);
    }
}

#[tokio::test]
async fn test_failed_batch_can_be_retried_at_same_offset() {
    let producer = RecordingProducer::new();
    let mut sink = acquire_counter(MemoryStateSource::empty(), &producer)
        .await
        .unwrap();

    producer.fail_next(TransactionStage::Commit);
    assert!(sink.emit(counts(&[("a", 1)], 5)).await.is_err());

    let summary = sink.emit(counts(&[("a", 1)], 5)).await.unwrap();
    assert_eq!(summary.committed_offset, 6);

    let log = producer.log();
    assert_eq!(log.committed_offsets, vec![(input(), 6)]);
    assert_eq!(log.durable_for(STATE_TOPIC).len(), 1);
}

#[tokio::test]
async fn test_serialization_failure_opens_no_transaction() {
    let producer = RecordingProducer::new();
    let codecs = SinkCodecs::new(
        StringSerializer,
        FailingSerializer,
        KeyValueRecordsBuilder::new(OUTPUT_TOPIC, StringSerializer, JsonSerializer),
    );
    let mut sink: StatefulSink<String, u64, (String, u64), _, _, RecordingProducer> =
        StatefulSink::acquire(
            &layout(),
            input(),
            codecs,
            |_| Ok(MemoryStateSource::empty()),
            producer.clone(),
            None,
        )
        .await
        .unwrap();

    let err = sink.emit(counts(&[("a", 1)], 3)).await.unwrap_err();

    assert!(matches!(
        err,
        StateSinkError::Serialization { offset: 3, .. }
    ));
    assert_eq!(producer.log().begun, 0);
}

#[tokio::test]
async fn test_output_builder_failure_opens_no_transaction() {
    let producer = RecordingProducer::new();
    let codecs = SinkCodecs::new(
        StringSerializer,
        JsonSerializer,
        |_: &(String, u64)| -> Result<Vec<ProducerRecord>, SerializationError> {
            Err(SerializationError::SerializationFailed("no route".to_string()))
        },
    );
    let mut sink: StatefulSink<String, u64, (String, u64), _, _, RecordingProducer> =
        StatefulSink::acquire(
            &layout(),
            input(),
            codecs,
            |_| Ok(MemoryStateSource::empty()),
            producer.clone(),
            None,
        )
        .await
        .unwrap();

    assert!(sink.emit(counts(&[("a", 1)], 3)).await.is_err());
    // State-only batches do not touch the builder
    let summary = sink
        .emit(ProcessedBatch::new(4).with_state("a".to_string(), 1))
        .await
        .unwrap();
    assert_eq!(summary.output_records, 0);
    assert_eq!(producer.log().committed, 1);
}

#[tokio::test]
async fn test_commit_offset_never_regresses() {
    let producer = RecordingProducer::new();
    let mut sink = acquire_counter(MemoryStateSource::empty(), &producer)
        .await
        .unwrap();

    sink.emit(counts(&[("a", 1)], 10)).await.unwrap();

    for stale in [10, 9] {
        match sink.emit(counts(&[("a", 2)], stale)).await {
            Err(StateSinkError::StaleCommitOffset {
                offset,
                last_emitted,
                ..
            }) => {
                assert_eq!(offset, stale);
                assert_eq!(last_emitted, 10);
            }
            other => panic!("Expected StaleCommitOffset, got: {:?}", other.map(|_| ())),
        }
    }

    sink.emit(counts(&[("a", 2)], 11)).await.unwrap();
    assert_eq!(
        producer.log().committed_offsets,
        vec![(input(), 11), (input(), 12)]
    );
}

#[tokio::test]
async fn test_restart_recovers_emitted_state() {
    let producer = RecordingProducer::new();
    let mut sink = acquire_counter(MemoryStateSource::new(vec![put(0, "old", 1)]), &producer)
        .await
        .unwrap();

    sink.emit(counts(&[("a", 1), ("b", 1)], 0)).await.unwrap();
    sink.emit(
        ProcessedBatch::new(1)
            .with_state("a".to_string(), 2)
            .with_deletion("old".to_string()),
    )
    .await
    .unwrap();
    drop(sink);

    // Replay what was written to the state partition into a fresh sink
    let mut history = vec![put(0, "old", 1)];
    let written = producer.log().durable_for(STATE_TOPIC);
    history.extend(as_state_partition(&written).into_iter().map(|mut record| {
        record.offset += 1;
        record
    }));

    let restarted = acquire_counter(MemoryStateSource::new(history), &RecordingProducer::new())
        .await
        .unwrap();

    let recovered = restarted.latest_state();
    assert_eq!(recovered.len(), 2);
    assert_eq!(recovered.get("a"), Some(&2));
    assert_eq!(recovered.get("b"), Some(&1));
    assert!(!recovered.contains_key("old"));
}
