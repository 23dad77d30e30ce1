use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::config::ConsumerConfig;
use super::handler::{BatchHandler, HandlerError};
use crate::broker::{BrokerClient, BrokerError, PollError, PolledBatch};
use crate::checkpoint_store::CheckpointStore;
use crate::checkpoint_ticker::CheckpointTicker;
use crate::kafka_types::{Record, TopicPartition};
use crate::partition_state::SharedPartitionStateCache;
use crate::prometheus_metrics::{ConsumerMetrics, REASON_NO_COMMITTED_OFFSET, REASON_OFFSET_OUT_OF_RANGE};
use crate::rebalance::RebalanceCoordinator;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Batch handler failed: {0}")]
    Handler(HandlerError),

    #[error("Broker failed: {0}")]
    Broker(#[from] BrokerError),
}

/// What a [`BatchConsumer::run`] got done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunStats {
    pub polls: u64,
    pub records: u64,
    pub windows: u64,
}

enum LoopState {
    /// Open a window, then carry on dispatching what's left of the batch.
    AwaitingStart { remaining: PolledBatch },
    Polling,
    Dispatching { remaining: PolledBatch },
    /// Close the window of `tp`, then carry on dispatching what's left of the batch.
    CloseWindow { tp: TopicPartition, remaining: PolledBatch },
    Stopped,
}

/// Polls a [`BrokerClient`] and drives a [`BatchHandler`] through per-partition windows,
/// keeping the progress of every owned partition checkpointed.
///
/// While running, it owns:
///
/// * a [`RebalanceCoordinator`], subscribed to the broker, flushing/loading checkpoints on rebalance
/// * a [`CheckpointTicker`], flushing checkpoints every [`ConsumerConfig::checkpoint_interval`]
pub struct BatchConsumer<H: BatchHandler> {
    broker: Arc<dyn BrokerClient>,
    handler: H,
    store: Arc<dyn CheckpointStore>,
    cache: SharedPartitionStateCache,
    config: ConsumerConfig,
    metrics: ConsumerMetrics,
}

impl<H: BatchHandler> BatchConsumer<H> {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        handler: H,
        store: Arc<dyn CheckpointStore>,
        cache: SharedPartitionStateCache,
        config: ConsumerConfig,
        metrics: ConsumerMetrics,
    ) -> Self {
        Self {
            broker,
            handler,
            store,
            cache,
            config,
            metrics,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Consume until the run budget is exhausted, `shutdown_token` is cancelled, or an error occurs.
    ///
    /// Whatever the outcome, before returning the broker client is stopped (flushing the
    /// checkpoints of the owned partitions), and the checkpoint ticker is cancelled and awaited.
    /// This holds even if the handler panics: the panic is resumed once shut down.
    pub async fn run(&mut self, shutdown_token: &CancellationToken) -> Result<RunStats, ConsumerError> {
        let ticker_token = shutdown_token.child_token();
        let ticker = CheckpointTicker::new(
            self.store.clone(),
            self.cache.clone(),
            self.config.checkpoint_interval,
            self.metrics.clone(),
        )
        .spawn(ticker_token.clone());
        let ticker_guard = ticker_token.drop_guard();

        let res = AssertUnwindSafe(self.consume(shutdown_token)).catch_unwind().await;

        info!("Shutting down");
        self.broker.stop().await;
        drop(ticker_guard);
        if let Err(e) = ticker.await {
            error!("Checkpoint ticker terminated abnormally: {e}");
        }

        match res {
            Ok(Ok(stats)) => {
                info!("Consumer stopped: {stats:?}");
                Ok(stats)
            },
            Ok(Err(e)) => {
                error!("Consumer failed: {e}");
                Err(e)
            },
            Err(panic) => {
                error!("Consumer panicked");
                resume_unwind(panic)
            },
        }
    }

    async fn consume(&mut self, shutdown_token: &CancellationToken) -> Result<RunStats, ConsumerError> {
        let coordinator =
            Arc::new(RebalanceCoordinator::new(self.store.clone(), self.cache.clone(), self.metrics.clone()));
        self.broker.subscribe(&self.config.topics, coordinator).await?;

        let mut stats = RunStats::default();
        let mut state = LoopState::AwaitingStart {
            remaining: PolledBatch::new(),
        };

        loop {
            state = match state {
                LoopState::AwaitingStart { remaining } => {
                    self.handler.on_start().await.map_err(ConsumerError::Handler)?;
                    if remaining.is_empty() {
                        LoopState::Polling
                    } else {
                        LoopState::Dispatching { remaining }
                    }
                },
                LoopState::Polling => {
                    if shutdown_token.is_cancelled() || !self.config.should_run(stats.polls) {
                        LoopState::Stopped
                    } else {
                        stats.polls += 1;
                        match self.broker.poll(self.config.poll_timeout).await {
                            Ok(batch) if batch.is_empty() => LoopState::Polling,
                            Ok(batch) => LoopState::Dispatching { remaining: batch },
                            Err(e) => {
                                self.recover(e).await?;
                                LoopState::Polling
                            },
                        }
                    }
                },
                LoopState::Dispatching { mut remaining } => match remaining.pop_first() {
                    None => LoopState::Polling,
                    Some((tp, records)) if !self.cache.with(|c| c.contains(&tp)) => {
                        debug!("Skipping {} records of {tp}: no longer owned", records.len());
                        LoopState::Dispatching { remaining }
                    },
                    Some((tp, records)) => {
                        stats.records += self.dispatch(&tp, records).await?;
                        self.pause(shutdown_token).await;

                        let window_count = self.cache.with(|c| c.window_count(&tp));
                        if self.config.should_close_window(window_count) {
                            LoopState::CloseWindow { tp, remaining }
                        } else {
                            LoopState::Dispatching { remaining }
                        }
                    },
                },
                LoopState::CloseWindow { tp, remaining } => {
                    self.handler.on_end().await.map_err(ConsumerError::Handler)?;
                    let closed = self.cache.with(|c| {
                        let closed = c.close_window(&tp);
                        c.open_window(&tp);
                        closed
                    });
                    debug!("Closed window of {tp} ({closed} records)");

                    stats.windows += 1;
                    let partition = tp.partition.to_string();
                    self.metrics.windows.with_label_values(&[tp.topic.as_str(), partition.as_str()]).inc();

                    LoopState::AwaitingStart { remaining }
                },
                LoopState::Stopped => break,
            };
        }

        Ok(stats)
    }

    /// Hand the `records` of `tp` to the handler, one at a time, tracking them in the cache.
    async fn dispatch(&mut self, tp: &TopicPartition, records: Vec<Record>) -> Result<u64, ConsumerError> {
        let partition = tp.partition.to_string();
        let counter = self.metrics.records.with_label_values(&[tp.topic.as_str(), partition.as_str()]);

        let mut dispatched = 0;
        for record in records {
            if !self.cache.with(|c| c.contains(tp)) {
                debug!("Stopped dispatching {tp} after {dispatched} records: no longer owned");
                break;
            }
            self.handler.on_record(&record).await.map_err(ConsumerError::Handler)?;
            self.cache.with(|c| c.record(tp, 1, record.offset));
            counter.inc();
            dispatched += 1;
        }

        trace!("Dispatched {dispatched} records of {tp}");
        Ok(dispatched)
    }

    /// Throttle between partitions: cut short by shutdown.
    async fn pause(&self, shutdown_token: &CancellationToken) {
        if self.config.partition_pause.is_zero() {
            return;
        }

        tokio::select! {
            _ = sleep(self.config.partition_pause) => {},
            _ = shutdown_token.cancelled() => {},
        }
    }

    /// Recover from a failed poll, or give up if the failure is fatal.
    async fn recover(&self, e: PollError) -> Result<(), ConsumerError> {
        let (tps, reason) = match e {
            PollError::OffsetOutOfRange(tps) => (tps, REASON_OFFSET_OUT_OF_RANGE),
            PollError::NoCommittedOffset(tp) => (vec![tp], REASON_NO_COMMITTED_OFFSET),
            PollError::Transient(msg) => {
                warn!("Poll failed, retrying: {msg}");
                return Ok(());
            },
            PollError::Fatal(e) => return Err(e.into()),
        };

        warn!("Discarding progress of {tps:?} ({reason}): replaying from earliest");
        self.cache.with(|c| {
            for tp in &tps {
                c.discard(tp);
            }
        });
        self.metrics.discards.with_label_values(&[reason]).inc_by(tps.len() as u64);

        // The failed position is still in place: the next poll reports it again, and this is retried
        if let Err(e) = self.broker.seek_to_earliest(&tps).await {
            error!("Failed to seek {tps:?} to earliest: {e}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use tokio::time::Duration;

    use super::*;
    use crate::broker::mock::{MockBroker, MockEvent};
    use crate::checkpoint_store::{Checkpoint, MemoryCheckpointStore};
    use super::super::handler::HandlerResult;
    use crate::partition_state::NO_OFFSET;
    use crate::rebalance::ReadPosition;

    const TOPIC: &str = "lib.server.game";

    fn tp(p: u32) -> TopicPartition {
        TopicPartition::new(TOPIC, p)
    }

    fn records(p: u32, offsets: &[i64]) -> Vec<Record> {
        offsets
            .iter()
            .map(|o| Record {
                topic: TOPIC.into(),
                partition: p,
                offset: *o,
                ..Default::default()
            })
            .collect()
    }

    #[derive(Default)]
    struct RecordingHandler {
        events: Vec<String>,
        fail_at: Option<i64>,
        panic_at: Option<i64>,
    }

    #[async_trait::async_trait]
    impl BatchHandler for RecordingHandler {
        async fn on_start(&mut self) -> HandlerResult {
            self.events.push("start".into());
            Ok(())
        }

        async fn on_record(&mut self, record: &Record) -> HandlerResult {
            if self.panic_at == Some(record.offset) {
                panic!("record at {} is unreadable", record.offset);
            }
            if self.fail_at == Some(record.offset) {
                return Err(format!("cannot transform record at {}", record.offset).into());
            }
            self.events.push(format!("{}@{}", record.partition, record.offset));
            Ok(())
        }

        async fn on_end(&mut self) -> HandlerResult {
            self.events.push("end".into());
            Ok(())
        }
    }

    fn config(continuous: bool, batch_size: u64, run_budget: u64) -> ConsumerConfig {
        ConsumerConfig {
            topics: vec![TOPIC.into()],
            continuous,
            batch_size,
            run_budget,
            poll_timeout: Duration::from_millis(1),
            partition_pause: Duration::ZERO,
            checkpoint_interval: Duration::from_secs(3600),
        }
    }

    struct Harness {
        broker: Arc<MockBroker>,
        store: Arc<MemoryCheckpointStore>,
        cache: SharedPartitionStateCache,
        metrics: ConsumerMetrics,
        consumer: BatchConsumer<RecordingHandler>,
    }

    fn harness(script: Vec<MockEvent>, store: MemoryCheckpointStore, config: ConsumerConfig) -> Harness {
        harness_with_handler(script, store, config, RecordingHandler::default())
    }

    fn harness_with_handler(
        script: Vec<MockEvent>,
        store: MemoryCheckpointStore,
        config: ConsumerConfig,
        handler: RecordingHandler,
    ) -> Harness {
        let broker = Arc::new(MockBroker::new(script));
        let store = Arc::new(store);
        let cache = SharedPartitionStateCache::new();
        let metrics = ConsumerMetrics::unregistered();
        let consumer =
            BatchConsumer::new(broker.clone(), handler, store.clone(), cache.clone(), config, metrics.clone());

        Harness {
            broker,
            store,
            cache,
            metrics,
            consumer,
        }
    }

    #[tokio::test]
    async fn should_close_window_once_above_threshold() {
        let mut h = harness(
            vec![MockEvent::Assign(vec![tp(0)]), MockEvent::Records(records(0, &[10, 11, 12]))],
            MemoryCheckpointStore::new(),
            config(true, 2, 1),
        );

        let stats = h.consumer.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(h.consumer.handler().events, vec!["start", "0@10", "0@11", "0@12", "end", "start"]);
        assert_eq!(
            stats,
            RunStats {
                polls: 1,
                records: 3,
                windows: 1
            }
        );
        assert_eq!(h.broker.positions(), vec![(tp(0), ReadPosition::Earliest)]);

        // Flushed on revoke, when the broker client was stopped
        assert_eq!(h.store.get(&tp(0)).await, Some(Checkpoint::new(12, 3)));
        assert!(h.cache.with(|c| c.is_empty()));
        assert!(h.broker.is_stopped());
    }

    #[tokio::test]
    async fn should_keep_window_open_until_threshold_is_exceeded() {
        let mut h = harness(
            vec![MockEvent::Assign(vec![tp(0)]), MockEvent::Records(records(0, &[10, 11]))],
            MemoryCheckpointStore::new(),
            config(true, 2, 1),
        );

        let stats = h.consumer.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(h.consumer.handler().events, vec!["start", "0@10", "0@11"]);
        assert_eq!(stats.windows, 0);

        // The open window is part of what got flushed on revoke
        assert_eq!(h.store.get(&tp(0)).await, Some(Checkpoint::new(11, 2)));
    }

    #[tokio::test]
    async fn should_skip_records_of_partitions_revoked_during_poll() {
        let mut h = harness(
            vec![
                MockEvent::Assign(vec![tp(0)]),
                MockEvent::Records(records(0, &[0, 1])),
                MockEvent::Revoke(vec![tp(0)]),
                MockEvent::Records(records(0, &[2])),
            ],
            MemoryCheckpointStore::new(),
            config(true, 1000, 3),
        );

        let stats = h.consumer.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(h.consumer.handler().events, vec!["start", "0@0", "0@1"]);
        assert_eq!(stats.records, 2);
        assert_eq!(h.cache.with(|c| c.get(&tp(0))), None);
        assert_eq!(h.store.get(&tp(0)).await, Some(Checkpoint::new(1, 2)));
        assert_eq!(h.store.flush_count(), 1);
    }

    #[tokio::test]
    async fn should_stop_broker_before_resuming_handler_panic() {
        let handler = RecordingHandler {
            panic_at: Some(11),
            ..Default::default()
        };
        let mut h = harness_with_handler(
            vec![MockEvent::Assign(vec![tp(0)]), MockEvent::Records(records(0, &[10, 11]))],
            MemoryCheckpointStore::new(),
            config(true, 1000, 0),
            handler,
        );

        let res = AssertUnwindSafe(h.consumer.run(&CancellationToken::new())).catch_unwind().await;

        assert!(res.is_err());
        assert!(h.broker.is_stopped());
        assert_eq!(h.store.get(&tp(0)).await, Some(Checkpoint::new(10, 1)));
    }

    #[tokio::test]
    async fn should_discard_and_replay_partitions_out_of_range() {
        let store = MemoryCheckpointStore::with_checkpoints([
            (tp(1), Checkpoint::new(5, 6)),
            (tp(2), Checkpoint::new(7, 8)),
        ]);
        let mut h = harness(
            vec![
                MockEvent::Assign(vec![tp(1), tp(2)]),
                MockEvent::Fail(PollError::OffsetOutOfRange(vec![tp(1), tp(2)])),
            ],
            store,
            config(true, 1000, 1),
        );

        h.consumer.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(h.consumer.handler().events, vec!["start"]);
        assert_eq!(
            h.broker.positions(),
            vec![
                (tp(1), ReadPosition::Offset(6)),
                (tp(2), ReadPosition::Offset(8)),
                (tp(1), ReadPosition::Earliest),
                (tp(2), ReadPosition::Earliest),
            ]
        );
        assert_eq!(h.metrics.discards.with_label_values(&[REASON_OFFSET_OUT_OF_RANGE]).get(), 2);

        // Discarded progress is what got flushed on revoke
        assert_eq!(h.store.get(&tp(1)).await, Some(Checkpoint::new(NO_OFFSET, 0)));
        assert_eq!(h.store.get(&tp(2)).await, Some(Checkpoint::new(NO_OFFSET, 0)));
    }

    #[tokio::test]
    async fn should_discard_and_replay_partition_without_committed_offset() {
        let mut h = harness(
            vec![
                MockEvent::Assign(vec![tp(4)]),
                MockEvent::Records(records(4, &[100])),
                MockEvent::Fail(PollError::NoCommittedOffset(tp(4))),
            ],
            MemoryCheckpointStore::new(),
            config(true, 1000, 2),
        );

        h.consumer.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(h.consumer.handler().events, vec!["start", "4@100"]);
        assert_eq!(h.store.get(&tp(4)).await, Some(Checkpoint::new(NO_OFFSET, 0)));
        assert_eq!(
            h.broker.positions(),
            vec![(tp(4), ReadPosition::Earliest), (tp(4), ReadPosition::Earliest)]
        );
        assert_eq!(h.metrics.discards.with_label_values(&[REASON_NO_COMMITTED_OFFSET]).get(), 1);
    }

    #[tokio::test]
    async fn should_resume_assigned_partition_after_checkpoint() {
        let mut h = harness(
            vec![MockEvent::Assign(vec![tp(3)]), MockEvent::Records(records(3, &[43, 44]))],
            MemoryCheckpointStore::with_checkpoints([(tp(3), Checkpoint::new(42, 1000))]),
            config(true, 1000, 1),
        );

        h.consumer.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(h.broker.positions(), vec![(tp(3), ReadPosition::Offset(43))]);
        assert_eq!(h.store.get(&tp(3)).await, Some(Checkpoint::new(44, 1002)));
    }

    #[tokio::test]
    async fn should_close_every_touched_window_in_single_shot_mode() {
        let mut batch = records(0, &[0, 1]);
        batch.extend(records(1, &[5]));
        let mut h = harness(
            vec![MockEvent::Assign(vec![tp(0), tp(1)]), MockEvent::Records(batch), MockEvent::Records(records(0, &[2]))],
            MemoryCheckpointStore::new(),
            config(false, 1000, 0),
        );

        let stats = h.consumer.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            h.consumer.handler().events,
            vec!["start", "0@0", "0@1", "end", "start", "1@5", "end", "start"]
        );
        assert_eq!(stats.polls, 1);
        assert_eq!(h.broker.poll_count(), 1);
        assert_eq!(h.store.get(&tp(0)).await, Some(Checkpoint::new(1, 2)));
        assert_eq!(h.store.get(&tp(1)).await, Some(Checkpoint::new(5, 1)));
    }

    #[tokio::test]
    async fn should_stop_when_run_budget_is_exhausted() {
        let mut h = harness(vec![], MemoryCheckpointStore::new(), config(true, 1000, 3));

        let stats = h.consumer.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(stats.polls, 3);
        assert_eq!(h.broker.poll_count(), 3);
        assert_eq!(h.consumer.handler().events, vec!["start"]);
    }

    #[tokio::test]
    async fn should_not_poll_once_shutdown_is_requested() {
        let mut h = harness(vec![], MemoryCheckpointStore::new(), config(true, 1000, 0));
        let token = CancellationToken::new();
        token.cancel();

        let stats = h.consumer.run(&token).await.unwrap();

        assert_eq!(stats.polls, 0);
        assert!(h.broker.is_stopped());
    }

    #[tokio::test]
    async fn should_return_handler_failure_after_flushing() {
        let handler = RecordingHandler {
            fail_at: Some(11),
            ..Default::default()
        };
        let mut h = harness_with_handler(
            vec![MockEvent::Assign(vec![tp(0)]), MockEvent::Records(records(0, &[10, 11, 12]))],
            MemoryCheckpointStore::new(),
            config(true, 1000, 0),
            handler,
        );

        let res = h.consumer.run(&CancellationToken::new()).await;

        assert!(matches!(res, Err(ConsumerError::Handler(_))));
        assert!(h.broker.is_stopped());
        assert_eq!(h.store.get(&tp(0)).await, Some(Checkpoint::new(10, 1)));
    }

    #[tokio::test]
    async fn should_return_fatal_broker_failures() {
        let mut h = harness(
            vec![MockEvent::Fail(PollError::Fatal(BrokerError::AlreadySubscribed))],
            MemoryCheckpointStore::new(),
            config(true, 1000, 0),
        );

        let res = h.consumer.run(&CancellationToken::new()).await;

        assert!(matches!(res, Err(ConsumerError::Broker(BrokerError::AlreadySubscribed))));
        assert!(h.broker.is_stopped());
    }

    #[tokio::test]
    async fn should_carry_on_after_transient_failures() {
        let mut h = harness(
            vec![
                MockEvent::Assign(vec![tp(0)]),
                MockEvent::Fail(PollError::Transient("broker transport failure".into())),
                MockEvent::Records(records(0, &[7])),
            ],
            MemoryCheckpointStore::new(),
            config(true, 1000, 2),
        );

        let stats = h.consumer.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(stats.records, 1);
        assert_eq!(h.consumer.handler().events, vec!["start", "0@7"]);
    }
}
