//! Velostate counter
//!
//! Reference runner for one input partition: counts records per key, keeps the running
//! count as state in the state topic and emits `key -> count` to an output topic, each batch
//! as one transaction.

use clap::{value_parser, Arg, ArgMatches, Command};
use log::{error, info, warn};
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use std::collections::HashMap;
use std::time::Duration;
use velostate::{
    group_and_process, BoxError, JsonSerializer, KeyValueRecordsBuilder, KeyedRecord,
    SinkCodecs, StateUpdate, StatefulSink, StatefulSinkConfig, StringSerializer, TopicPartition,
};

type CounterSink = StatefulSink<String, u64, (String, u64), StringSerializer, JsonSerializer>;

fn cli() -> Command {
    Command::new("velostate-counter")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Exactly-once per-key counter over one Kafka partition")
        .arg(
            Arg::new("brokers")
                .long("brokers")
                .short('b')
                .help("Kafka bootstrap servers")
                .default_value("localhost:9092"),
        )
        .arg(
            Arg::new("input-topic")
                .long("input-topic")
                .help("Topic to count")
                .required(true),
        )
        .arg(
            Arg::new("input-partition")
                .long("input-partition")
                .help("Partition of the input topic owned by this process")
                .value_parser(value_parser!(i32))
                .default_value("0"),
        )
        .arg(
            Arg::new("input-partitions")
                .long("input-partitions")
                .help("Partition count of the input topic")
                .value_parser(value_parser!(i32))
                .required(true),
        )
        .arg(
            Arg::new("state-topic")
                .long("state-topic")
                .help("Compacted topic holding the counts")
                .required(true),
        )
        .arg(
            Arg::new("state-partitions")
                .long("state-partitions")
                .help("Partition count of the state topic")
                .value_parser(value_parser!(i32))
                .required(true),
        )
        .arg(
            Arg::new("output-topic")
                .long("output-topic")
                .help("Topic receiving key -> count records")
                .required(true),
        )
        .arg(
            Arg::new("group-id")
                .long("group-id")
                .help("Consumer group committing input offsets")
                .default_value("velostate-counter"),
        )
        .arg(
            Arg::new("batch-size")
                .long("batch-size")
                .help("Maximum records per batch")
                .value_parser(value_parser!(usize))
                .default_value("500"),
        )
        .arg(
            Arg::new("batch-linger-ms")
                .long("batch-linger-ms")
                .help("Maximum time to wait while filling a batch")
                .value_parser(value_parser!(u64))
                .default_value("1000"),
        )
        .arg(
            Arg::new("recovery-timeout-secs")
                .long("recovery-timeout-secs")
                .help("Give up recovering state after this many seconds")
                .value_parser(value_parser!(u64)),
        )
}

fn arg<T: Clone + Send + Sync + 'static>(matches: &ArgMatches, id: &str) -> Result<T, BoxError> {
    matches
        .get_one::<T>(id)
        .cloned()
        .ok_or_else(|| BoxError::from(format!("missing argument --{}", id)))
}

/// Pull up to `max_records` keyed records, waiting at most `linger` in total
async fn next_batch(
    consumer: &StreamConsumer,
    max_records: usize,
    linger: Duration,
) -> Result<Vec<KeyedRecord<String, u64>>, BoxError> {
    let mut batch = Vec::with_capacity(max_records);
    let deadline = tokio::time::Instant::now() + linger;
    while batch.len() < max_records {
        let message = match tokio::time::timeout_at(deadline, consumer.recv()).await {
            Ok(message) => message?,
            Err(_) => break,
        };
        let key = match message.key().map(std::str::from_utf8) {
            Some(Ok(key)) => key.to_string(),
            _ => {
                warn!(
                    "Skipping record at offset {} without a UTF-8 key",
                    message.offset()
                );
                continue;
            }
        };
        batch.push(KeyedRecord::new(key, 1, message.offset()));
    }
    Ok(batch)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();
    let matches = cli().get_matches();

    let brokers: String = arg(&matches, "brokers")?;
    let input = TopicPartition::new(
        arg::<String>(&matches, "input-topic")?,
        arg(&matches, "input-partition")?,
    );
    let output_topic: String = arg(&matches, "output-topic")?;
    let group_id: String = arg(&matches, "group-id")?;
    let batch_size: usize = arg(&matches, "batch-size")?;
    let linger = Duration::from_millis(arg(&matches, "batch-linger-ms")?);

    let mut config = StatefulSinkConfig::new(
        brokers.as_str(),
        arg::<String>(&matches, "state-topic")?,
        arg(&matches, "input-partitions")?,
        arg(&matches, "state-partitions")?,
    )
    .client_id(format!("velostate-counter-{}", input));
    if let Some(secs) = matches.get_one::<u64>("recovery-timeout-secs") {
        config = config.recovery_timeout(Duration::from_secs(*secs));
    }

    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .set("group.id", &group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("isolation.level", "read_committed")
        .create()?;
    let mut assignment = TopicPartitionList::new();
    assignment.add_partition_offset(&input.topic, input.partition, Offset::Stored)?;
    consumer.assign(&assignment)?;
    let group_metadata = consumer
        .group_metadata()
        .ok_or("consumer has no group metadata")?;

    let codecs = SinkCodecs::new(
        StringSerializer,
        JsonSerializer,
        KeyValueRecordsBuilder::new(output_topic.as_str(), StringSerializer, JsonSerializer),
    );
    let mut sink: CounterSink =
        StatefulSink::connect(&config, input.clone(), group_metadata, codecs).await?;

    // The sink's state is the snapshot taken at acquisition; counts since then live here
    let mut counts: HashMap<String, u64> = sink
        .latest_state()
        .iter()
        .map(|(key, count)| (key.clone(), *count))
        .collect();
    info!(
        "Counting {} into {} starting from {} known keys",
        input,
        output_topic,
        counts.len()
    );

    loop {
        let batch = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
            batch = next_batch(&consumer, batch_size, linger) => batch?,
        };

        let known = &counts;
        let grouped = group_and_process(batch, |key: String, values: Vec<u64>| {
            let count = known.get(&key).copied().unwrap_or(0) + values.iter().sum::<u64>();
            async move { Ok::<_, BoxError>(StateUpdate::set(count).with_output((key, count))) }
        })
        .await?;
        let Some(grouped) = grouped else {
            continue;
        };

        let processed = grouped.into_processed();
        let updated: Vec<(String, u64)> = processed
            .states
            .iter()
            .filter_map(|(key, count)| count.map(|count| (key.clone(), count)))
            .collect();

        match sink.emit(processed).await {
            Ok(summary) => {
                counts.extend(updated);
                info!(
                    "Committed {} up to offset {} ({} keys updated)",
                    input, summary.committed_offset, summary.state_records
                );
            }
            Err(e) => {
                // The consumer position is past the failed batch; restart from the committed offset
                error!("Emit failed, exiting: {}", e);
                return Err(e.into());
            }
        }
    }

    Ok(())
}
