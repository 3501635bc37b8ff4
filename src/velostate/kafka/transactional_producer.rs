//! Transactional producer driven by a dedicated manager thread.
//!
//! librdkafka's transactional API is blocking and must not be driven from several threads at
//! once. Every operation is therefore sent as a command to one thread that owns the
//! `BaseProducer`; the async side awaits the reply on a oneshot channel.

use super::context::LoggingClientContext;
use crate::velostate::partition::TopicPartition;
use crate::velostate::sink::{ProducerRecord, TransactionalProducer};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::ConsumerGroupMetadata;
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::producer::{BaseProducer, BaseRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::oneshot;

type Reply = oneshot::Sender<KafkaResult<()>>;

/// Commands sent to the transaction manager thread
enum TxnCommand {
    /// Send one record into the open transaction
    Send { record: ProducerRecord, reply: Reply },
    /// Begin a new transaction
    BeginTransaction { reply: Reply },
    /// Add consumer offsets to the open transaction
    SendOffsets {
        offsets: TopicPartitionList,
        reply: Reply,
    },
    /// Commit current transaction (flushes first)
    CommitTransaction { reply: Reply },
    /// Abort current transaction
    AbortTransaction { reply: Reply },
    /// Stop the manager thread
    Stop,
}

fn manager_unavailable() -> KafkaError {
    KafkaError::MessageProduction(RDKafkaErrorCode::Fail)
}

/// Transactional Kafka producer owning one `transactional.id`.
///
/// `init_transactions` runs in [`KafkaTransactionalProducer::start`], which fences any older
/// producer still using the same id. Consumer offsets are committed through the consumer group
/// metadata supplied at start.
pub struct KafkaTransactionalProducer {
    cmd_tx: mpsc::Sender<TxnCommand>,
    manager_thread: Option<JoinHandle<()>>,
    transactional_id: String,
}

impl KafkaTransactionalProducer {
    /// Create the producer, initialize transactions and spawn the manager thread.
    ///
    /// `operation_timeout` bounds init, send-offsets, commit and abort calls.
    pub async fn start(
        mut config: ClientConfig,
        transactional_id: &str,
        group_metadata: ConsumerGroupMetadata,
        operation_timeout: Duration,
    ) -> Result<Self, KafkaError> {
        config
            .set("transactional.id", transactional_id)
            .set("enable.idempotence", "true")
            .set("acks", "all");

        let producer: BaseProducer<LoggingClientContext> =
            config.create_with_context(LoggingClientContext::new(transactional_id))?;

        info!(
            "KafkaTransactionalProducer: Initializing transactions with id '{}'",
            transactional_id
        );
        let producer = tokio::task::spawn_blocking(move || {
            producer
                .init_transactions(operation_timeout)
                .map(|()| producer)
        })
        .await
        .map_err(|e| {
            error!(
                "KafkaTransactionalProducer: init_transactions task failed: {:?}",
                e
            );
            manager_unavailable()
        })??;
        info!("KafkaTransactionalProducer: Transactions initialized successfully");

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let manager_thread = Self::spawn_manager_thread(
            producer,
            group_metadata,
            cmd_rx,
            operation_timeout,
            transactional_id.to_string(),
        );

        Ok(Self {
            cmd_tx,
            manager_thread: Some(manager_thread),
            transactional_id: transactional_id.to_string(),
        })
    }

    pub fn transactional_id(&self) -> &str {
        &self.transactional_id
    }

    fn spawn_manager_thread(
        producer: BaseProducer<LoggingClientContext>,
        group_metadata: ConsumerGroupMetadata,
        cmd_rx: Receiver<TxnCommand>,
        timeout: Duration,
        transactional_id: String,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            debug!(
                "KafkaTransactionalProducer[{}]: Manager thread started",
                transactional_id
            );
            let mut in_transaction = false;

            for cmd in cmd_rx {
                match cmd {
                    TxnCommand::Send { record, reply } => {
                        let mut base = BaseRecord::<[u8], [u8]>::to(&record.topic);
                        if let Some(partition) = record.partition {
                            base = base.partition(partition);
                        }
                        if let Some(ref key) = record.key {
                            base = base.key(key.as_slice());
                        }
                        if let Some(ref payload) = record.payload {
                            base = base.payload(payload.as_slice());
                        }

                        let result = match producer.send(base) {
                            Ok(()) => {
                                producer.poll(Duration::ZERO);
                                Ok(())
                            }
                            Err((err, _)) => Err(err),
                        };
                        let _ = reply.send(result);
                    }

                    TxnCommand::BeginTransaction { reply } => {
                        let result = producer.begin_transaction();
                        if result.is_ok() {
                            in_transaction = true;
                            debug!(
                                "KafkaTransactionalProducer[{}]: Transaction begun",
                                transactional_id
                            );
                        }
                        let _ = reply.send(result);
                    }

                    TxnCommand::SendOffsets { offsets, reply } => {
                        let result =
                            producer.send_offsets_to_transaction(&offsets, &group_metadata, timeout);
                        let _ = reply.send(result);
                    }

                    TxnCommand::CommitTransaction { reply } => {
                        if !in_transaction {
                            warn!(
                                "KafkaTransactionalProducer[{}]: Commit requested but not in transaction",
                                transactional_id
                            );
                            let _ = reply.send(Ok(()));
                            continue;
                        }

                        if let Err(e) = producer.flush(timeout) {
                            error!(
                                "KafkaTransactionalProducer[{}]: Flush before commit failed: {:?}",
                                transactional_id, e
                            );
                            let _ = producer.abort_transaction(timeout);
                            in_transaction = false;
                            let _ = reply.send(Err(e));
                            continue;
                        }

                        match producer.commit_transaction(timeout) {
                            Ok(()) => {
                                in_transaction = false;
                                debug!(
                                    "KafkaTransactionalProducer[{}]: Transaction committed",
                                    transactional_id
                                );
                                let _ = reply.send(Ok(()));
                            }
                            Err(e) => {
                                error!(
                                    "KafkaTransactionalProducer[{}]: Commit failed: {:?}, aborting",
                                    transactional_id, e
                                );
                                let _ = producer.abort_transaction(timeout);
                                in_transaction = false;
                                let _ = reply.send(Err(e));
                            }
                        }
                    }

                    TxnCommand::AbortTransaction { reply } => {
                        let result = if in_transaction {
                            let r = producer.abort_transaction(timeout);
                            in_transaction = false;
                            debug!(
                                "KafkaTransactionalProducer[{}]: Transaction aborted",
                                transactional_id
                            );
                            r
                        } else {
                            Ok(())
                        };
                        let _ = reply.send(result);
                    }

                    TxnCommand::Stop => {
                        debug!(
                            "KafkaTransactionalProducer[{}]: Stop command received, in_tx={}",
                            transactional_id, in_transaction
                        );
                        if in_transaction {
                            let _ = producer.abort_transaction(timeout);
                        }
                        break;
                    }
                }
            }

            debug!(
                "KafkaTransactionalProducer[{}]: Manager thread stopped",
                transactional_id
            );
        })
    }

    /// Send a command to the manager thread and wait for its reply
    async fn request(&self, build: impl FnOnce(Reply) -> TxnCommand) -> KafkaResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.cmd_tx.send(build(reply_tx)).is_err() {
            error!(
                "KafkaTransactionalProducer[{}]: Manager thread is gone",
                self.transactional_id
            );
            return Err(manager_unavailable());
        }
        reply_rx.await.map_err(|_| {
            error!(
                "KafkaTransactionalProducer[{}]: Manager thread dropped the reply",
                self.transactional_id
            );
            manager_unavailable()
        })?
    }
}

/// Build the offset list committed with a transaction
pub(crate) fn offsets_to_list(offsets: &[(TopicPartition, i64)]) -> KafkaResult<TopicPartitionList> {
    let mut list = TopicPartitionList::with_capacity(offsets.len());
    for (tp, offset) in offsets {
        list.add_partition_offset(&tp.topic, tp.partition, Offset::Offset(*offset))?;
    }
    Ok(list)
}

#[async_trait]
impl TransactionalProducer for KafkaTransactionalProducer {
    async fn begin_transaction(&mut self) -> Result<(), KafkaError> {
        self.request(|reply| TxnCommand::BeginTransaction { reply })
            .await
    }

    async fn send(&mut self, record: ProducerRecord) -> Result<(), KafkaError> {
        self.request(|reply| TxnCommand::Send { record, reply }).await
    }

    async fn send_offsets_to_transaction(
        &mut self,
        offsets: Vec<(TopicPartition, i64)>,
    ) -> Result<(), KafkaError> {
        let offsets = offsets_to_list(&offsets)?;
        self.request(|reply| TxnCommand::SendOffsets { offsets, reply })
            .await
    }

    async fn commit_transaction(&mut self) -> Result<(), KafkaError> {
        self.request(|reply| TxnCommand::CommitTransaction { reply })
            .await
    }

    async fn abort_transaction(&mut self) -> Result<(), KafkaError> {
        self.request(|reply| TxnCommand::AbortTransaction { reply })
            .await
    }
}

/// Stopping aborts any open transaction, which can block for up to the operation timeout.
/// Inside a tokio runtime the manager thread is joined on the blocking pool so the dropping
/// task is not held up; elsewhere the drop joins it directly.
impl Drop for KafkaTransactionalProducer {
    fn drop(&mut self) {
        debug!(
            "KafkaTransactionalProducer[{}]: Dropping, sending stop command",
            self.transactional_id
        );
        let _ = self.cmd_tx.send(TxnCommand::Stop);
        let Some(handle) = self.manager_thread.take() else {
            return;
        };
        let transactional_id = self.transactional_id.clone();
        let join = move || {
            if let Err(e) = handle.join() {
                warn!(
                    "KafkaTransactionalProducer[{}]: Manager thread panicked during shutdown: {:?}",
                    transactional_id, e
                );
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(join);
            }
            Err(_) => join(),
        }
    }
}
