use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, Consumer, ConsumerContext, Rebalance, RebalanceProtocol, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::{ClientConfig, ClientContext, Offset, TopicPartitionList};
use tokio::runtime::Handle;
use tokio::task::block_in_place;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;

use super::errors::{BrokerError, BrokerResult, PollError};
use super::{group_records, BrokerClient, PolledBatch};
use crate::internals::retry_with_backoff;
use crate::kafka_types::{Record, TopicPartition};
use crate::rebalance::{ReadPosition, RebalanceListener};

/// Tuning of a [`KafkaBroker`].
#[derive(Debug, Clone)]
pub struct KafkaBrokerSettings {
    /// Upper bound of records returned by a single poll.
    pub max_poll_records: usize,
    /// Timeout of the requests made to the cluster outside of polling (metadata, seeks, watermarks).
    pub request_timeout: Duration,
    /// Delay between attempts to reach the cluster at startup.
    pub connect_backoff: Duration,
}

/// [`ConsumerContext`] that hands partition ownership changes to a [`RebalanceListener`].
///
/// librdkafka invokes rebalance callbacks synchronously, from within the poll: the listener
/// is driven to completion on the tokio runtime before the callback returns, so no record of
/// a newly assigned partition is fetched before its position has been decided.
pub struct RebalanceContext {
    listener: OnceLock<Arc<dyn RebalanceListener>>,
    runtime: Handle,
    request_timeout: Duration,
}

impl RebalanceContext {
    fn new(request_timeout: Duration) -> Self {
        Self {
            listener: OnceLock::new(),
            runtime: Handle::current(),
            request_timeout,
        }
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        block_in_place(|| self.runtime.block_on(fut))
    }

    fn apply_positions(
        &self,
        base_consumer: &BaseConsumer<Self>,
        positions: &[(TopicPartition, ReadPosition)],
    ) -> KafkaResult<()> {
        let tpl = position_list(positions)?;

        match base_consumer.rebalance_protocol() {
            RebalanceProtocol::Cooperative => {
                // Incremental assignments can't be replaced: the new partitions are repositioned instead
                let res = base_consumer.seek_partitions(tpl, self.request_timeout)?;
                for elem in res.elements() {
                    if let Err(e) = elem.error() {
                        error!("Failed to position {}: {e}", TopicPartition::from(&elem));
                    }
                }
                Ok(())
            },
            _ => base_consumer.assign(&tpl),
        }
    }
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, _base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        let Rebalance::Revoke(tpl) = rebalance else {
            return;
        };

        let revoked = to_topic_partitions(tpl);
        if revoked.is_empty() {
            return;
        }

        match self.listener.get() {
            Some(listener) => self.block_on(listener.on_partitions_revoked(&revoked)),
            None => warn!("Revoked {} partitions before a listener was set", revoked.len()),
        }
    }

    fn post_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let assigned = to_topic_partitions(tpl);
                if assigned.is_empty() {
                    return;
                }

                let Some(listener) = self.listener.get() else {
                    warn!("Assigned {} partitions before a listener was set", assigned.len());
                    return;
                };

                let positions = self.block_on(listener.on_partitions_assigned(&assigned));
                if let Err(e) = self.apply_positions(base_consumer, &positions) {
                    error!("Failed to position {} assigned partitions: {e}", positions.len());
                }
            },
            Rebalance::Revoke(_) => {
                debug!("Revocation completed");
            },
            Rebalance::Error(e) => {
                error!("Rebalance failed: {e}");
            },
        }
    }
}

/// A [`BrokerClient`] backed by a librdkafka consumer, member of a consumer group.
///
/// Offsets are never committed to Kafka: the read position of each partition is decided
/// by the [`RebalanceListener`] at assignment time. The client must be configured with
/// `auto.offset.reset=error`, so that positions that are no longer valid surface as
/// [`PollError`]s instead of being silently reset.
pub struct KafkaBroker {
    consumer: StreamConsumer<RebalanceContext>,
    settings: KafkaBrokerSettings,
    pending: Mutex<Option<PollError>>,
}

impl KafkaBroker {
    /// Create the consumer, and wait for the cluster to be reachable.
    ///
    /// Reaching the cluster is retried every [`KafkaBrokerSettings::connect_backoff`],
    /// until it succeeds or `shutdown_token` is cancelled.
    pub async fn connect(
        client_config: &ClientConfig,
        settings: KafkaBrokerSettings,
        shutdown_token: &CancellationToken,
    ) -> BrokerResult<Self> {
        let consumer: StreamConsumer<RebalanceContext> =
            client_config.create_with_context(RebalanceContext::new(settings.request_timeout))?;

        let probe = &consumer;
        let request_timeout = settings.request_timeout;
        let brokers = retry_with_backoff("Kafka cluster", settings.connect_backoff, shutdown_token, || async move {
            block_in_place(|| probe.fetch_metadata(None, request_timeout)).map(|m| m.brokers().len())
        })
        .await?;
        debug!("Kafka cluster has {brokers} brokers");

        Ok(Self {
            consumer,
            settings,
            pending: Mutex::new(None),
        })
    }

    fn take_pending(&self) -> Option<PollError> {
        match self.pending.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn stash_pending(&self, err: PollError) {
        match self.pending.lock() {
            Ok(mut guard) => *guard = Some(err),
            Err(poisoned) => *poisoned.into_inner() = Some(err),
        }
    }

    fn classify(&self, e: KafkaError) -> PollError {
        match e.rdkafka_error_code() {
            Some(RDKafkaErrorCode::OffsetOutOfRange) | Some(RDKafkaErrorCode::AutoOffsetReset) => {
                warn!("Consumption failed on invalid position: {e}");
                self.resolve_invalid_positions()
            },
            _ if matches!(e, KafkaError::MessageConsumptionFatal(_)) => PollError::Fatal(BrokerError::Kafka(e)),
            _ => PollError::Transient(e.to_string()),
        }
    }

    /// Work out which partitions are reading from an invalid position.
    ///
    /// librdkafka does not tell which partition failed, so the current position of every
    /// assigned partition is compared against its watermarks.
    fn resolve_invalid_positions(&self) -> PollError {
        let positions = match self.consumer.position() {
            Ok(p) => p,
            Err(e) => return PollError::Transient(format!("Unable to read partition positions: {e}")),
        };

        let mut assigned = Vec::new();
        let mut out_of_range = Vec::new();
        let mut unknown = Vec::new();
        for elem in positions.elements() {
            let tp = TopicPartition::from(&elem);
            match elem.offset() {
                Offset::Offset(o) => {
                    let watermarks = block_in_place(|| {
                        self.consumer.fetch_watermarks(&tp.topic, tp.partition as i32, self.settings.request_timeout)
                    });
                    match watermarks {
                        Ok((low, high)) if o < low || o > high => {
                            debug!("Position {o} of {tp} is outside [{low}, {high}]");
                            out_of_range.push(tp.clone());
                        },
                        Ok(_) => {},
                        Err(e) => warn!("Unable to fetch watermarks of {tp}: {e}"),
                    }
                },
                _ => unknown.push(tp.clone()),
            }
            assigned.push(tp);
        }

        if !out_of_range.is_empty() {
            return PollError::OffsetOutOfRange(out_of_range);
        }
        match unknown.len() {
            0 => {
                warn!("Unable to pinpoint the invalid positions: replaying all {} assigned partitions", assigned.len());
                PollError::OffsetOutOfRange(assigned)
            },
            1 => PollError::NoCommittedOffset(unknown.remove(0)),
            _ => PollError::OffsetOutOfRange(unknown),
        }
    }
}

#[async_trait]
impl BrokerClient for KafkaBroker {
    async fn subscribe(&self, topics: &[String], listener: Arc<dyn RebalanceListener>) -> BrokerResult<()> {
        self.consumer.context().listener.set(listener).map_err(|_| BrokerError::AlreadySubscribed)?;

        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&topics)?;

        info!("Subscribed to {topics:?}");
        Ok(())
    }

    async fn poll(&self, poll_timeout: Duration) -> Result<PolledBatch, PollError> {
        if let Some(e) = self.take_pending() {
            return Err(e);
        }

        let first = match timeout(poll_timeout, self.consumer.recv()).await {
            Err(_) => return Ok(PolledBatch::new()),
            Ok(Err(e)) => return Err(self.classify(e)),
            Ok(Ok(m)) => Record::from(&m),
        };

        // Drain whatever is already fetched, without waiting any further
        let mut records = vec![first];
        while records.len() < self.settings.max_poll_records {
            match timeout(Duration::ZERO, self.consumer.recv()).await {
                Err(_) => break,
                Ok(Ok(m)) => records.push(Record::from(&m)),
                Ok(Err(e)) => {
                    // Records polled so far are still valid: the error is reported by the next poll
                    let err = self.classify(e);
                    self.stash_pending(err);
                    break;
                },
            }
        }

        // Rebalance callbacks are served from within `recv()`: some of the records drained
        // may belong to partitions revoked since they were fetched
        match self.consumer.assignment() {
            Ok(tpl) => {
                let dropped = retain_assigned(&mut records, &to_topic_partitions(&tpl));
                if dropped > 0 {
                    debug!("Dropped {dropped} polled records of partitions no longer assigned");
                }
            },
            Err(e) => warn!("Unable to read assignment after poll: {e}"),
        }

        trace!("Polled {} records", records.len());
        Ok(group_records(records))
    }

    async fn seek_to_earliest(&self, tps: &[TopicPartition]) -> BrokerResult<()> {
        let positions: Vec<(TopicPartition, ReadPosition)> =
            tps.iter().map(|tp| (tp.clone(), ReadPosition::Earliest)).collect();
        let tpl = position_list(&positions)?;

        let res = block_in_place(|| self.consumer.seek_partitions(tpl, self.settings.request_timeout))?;
        for elem in res.elements() {
            if let Err(e) = elem.error() {
                return Err(BrokerError::Seek {
                    tp: TopicPartition::from(&elem),
                    reason: e.to_string(),
                });
            }
        }

        info!("Seeked to earliest: {tps:?}");
        Ok(())
    }

    async fn seek(&self, tp: &TopicPartition, offset: i64) -> BrokerResult<()> {
        block_in_place(|| {
            self.consumer.seek(&tp.topic, tp.partition as i32, Offset::Offset(offset), self.settings.request_timeout)
        })?;

        debug!("Seeked {tp} to {offset}");
        Ok(())
    }

    async fn stop(&self) {
        match self.consumer.assignment() {
            Ok(tpl) => {
                let owned = to_topic_partitions(&tpl);
                if let (false, Some(listener)) = (owned.is_empty(), self.consumer.context().listener.get()) {
                    listener.on_partitions_revoked(&owned).await;
                }
            },
            Err(e) => warn!("Unable to read assignment before leaving the group: {e}"),
        }

        self.consumer.unsubscribe();
        info!("Left consumer group");
    }
}

fn to_topic_partitions(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements().iter().map(TopicPartition::from).collect()
}

/// Keep only the `records` of `assigned` partitions, returning how many were dropped.
fn retain_assigned(records: &mut Vec<Record>, assigned: &[TopicPartition]) -> usize {
    let assigned: HashSet<&TopicPartition> = assigned.iter().collect();
    let polled = records.len();
    records.retain(|r| assigned.contains(&r.topic_partition()));
    polled - records.len()
}

fn position_list(positions: &[(TopicPartition, ReadPosition)]) -> KafkaResult<TopicPartitionList> {
    let mut tpl = TopicPartitionList::with_capacity(positions.len());
    for (tp, position) in positions {
        let offset = match position {
            ReadPosition::Earliest => Offset::Beginning,
            ReadPosition::Offset(o) => Offset::Offset(*o),
        };
        tpl.add_partition_offset(&tp.topic, tp.partition as i32, offset)?;
    }
    Ok(tpl)
}
