use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::checkpoint_store::CheckpointStore;
use crate::kafka_types::TopicPartition;
use crate::partition_state::SharedPartitionStateCache;
use crate::prometheus_metrics::{ConsumerMetrics, TRIGGER_TICK};

/// Periodically flushes the [`crate::checkpoint_store::Checkpoint`] of every owned partition.
///
/// Independent of rebalances: it bounds how much progress can be lost if the process dies
/// without getting the chance to flush on revoke.
pub struct CheckpointTicker {
    store: Arc<dyn CheckpointStore>,
    cache: SharedPartitionStateCache,
    interval: Duration,
    metrics: ConsumerMetrics,
}

impl CheckpointTicker {
    /// Create a new [`CheckpointTicker`].
    ///
    /// # Arguments
    ///
    /// * `store` - Where checkpoints get flushed to
    /// * `cache` - Source of the checkpoints to flush
    /// * `interval` - Time between the start of two consecutive flushes
    /// * `metrics` - Counters of flushes and flush failures
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        cache: SharedPartitionStateCache,
        interval: Duration,
        metrics: ConsumerMetrics,
    ) -> Self {
        Self {
            store,
            cache,
            interval,
            metrics,
        }
    }

    /// Spawn a new async task that flushes the cache every `interval`.
    ///
    /// The first flush happens one `interval` after spawning. The task concludes (joins)
    /// once `shutdown_token` is cancelled: no flush is started after that.
    pub fn spawn(self, shutdown_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick(&shutdown_token).await;
                    },
                    _ = shutdown_token.cancelled() => {
                        info!("Shutting down");
                        break;
                    },
                }
            }
        })
    }

    /// Flush every cached partition once, stopping early if `shutdown_token` gets cancelled.
    ///
    /// Each partition is flushed holding [`SharedPartitionStateCache::lock_flushes`], reading its
    /// latest state only once the lock is acquired: a partition revoked in the meantime is skipped.
    ///
    /// Returns the amount of partitions successfully flushed.
    async fn tick(&self, shutdown_token: &CancellationToken) -> usize {
        let tps: Vec<TopicPartition> = self.cache.with(|c| c.checkpoints()).into_iter().map(|(tp, _)| tp).collect();

        let mut flushed = 0;
        for tp in tps {
            if shutdown_token.is_cancelled() {
                debug!("Interrupted periodic checkpoint after {flushed} partitions");
                break;
            }

            let _flushing = self.cache.lock_flushes().await;
            let Some(checkpoint) = self.cache.with(|c| c.checkpoint_of(&tp)) else {
                trace!("Skipping periodic checkpoint of {tp}: no longer owned");
                continue;
            };

            match self.store.flush(&tp, &checkpoint).await {
                Ok(()) => {
                    self.metrics.flushes.with_label_values(&[TRIGGER_TICK]).inc();
                    flushed += 1;
                },
                Err(e) => {
                    warn!("Periodic checkpoint of {tp} failed: {e}");
                    self.metrics.flush_failures.with_label_values(&[TRIGGER_TICK]).inc();
                },
            }
        }

        trace!("Periodic checkpoint flushed {flushed} partitions");
        flushed
    }
}

#[cfg(test)]
mod test {
    use async_trait::async_trait;

    use super::*;
    use crate::checkpoint_store::{Checkpoint, CheckpointStoreResult, MemoryCheckpointStore};
    use crate::rebalance::RebalanceCoordinator;

    fn tp(p: u32) -> TopicPartition {
        TopicPartition::new("lib.server.game", p)
    }

    fn owning(tps: &[TopicPartition]) -> SharedPartitionStateCache {
        let cache = SharedPartitionStateCache::new();
        cache.with(|c| {
            for tp in tps {
                c.populate(tp, &Checkpoint::absent());
            }
        });
        cache
    }

    fn build(store: Arc<MemoryCheckpointStore>, cache: SharedPartitionStateCache, every: Duration) -> CheckpointTicker {
        CheckpointTicker::new(store, cache, every, ConsumerMetrics::unregistered())
    }

    #[tokio::test]
    async fn should_flush_cached_partitions_periodically() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let cache = owning(&[tp(0), tp(1)]);
        cache.with(|c| {
            c.record(&tp(0), 1, 10);
            c.record(&tp(1), 1, 20);
        });

        let token = CancellationToken::new();
        let handle = build(store.clone(), cache.clone(), Duration::from_millis(10)).spawn(token.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        handle.await.unwrap();

        assert!(store.flush_count() >= 2);
        assert_eq!(store.get(&tp(0)).await, Some(Checkpoint::new(10, 1)));
        assert_eq!(store.get(&tp(1)).await, Some(Checkpoint::new(20, 1)));

        // Flushing does not fold the window
        assert_eq!(cache.with(|c| c.window_count(&tp(0))), 1);
    }

    #[tokio::test]
    async fn should_not_flush_once_cancelled_mid_sleep() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let cache = owning(&[tp(0)]);
        cache.with(|c| c.record(&tp(0), 1, 10));

        let token = CancellationToken::new();
        let handle = build(store.clone(), cache, Duration::from_secs(3600)).spawn(token.clone());

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(store.flush_count(), 0);
    }

    #[tokio::test]
    async fn should_keep_ticking_through_store_outages() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let cache = owning(&[tp(0)]);
        cache.with(|c| c.record(&tp(0), 1, 10));
        let ticker = build(store.clone(), cache.clone(), Duration::from_secs(1));
        let token = CancellationToken::new();

        store.set_unavailable(true);
        assert_eq!(ticker.tick(&token).await, 0);
        assert_eq!(ticker.metrics.flush_failures.with_label_values(&[TRIGGER_TICK]).get(), 1);

        store.set_unavailable(false);
        cache.with(|c| c.record(&tp(0), 1, 11));
        assert_eq!(ticker.tick(&token).await, 1);
        assert_eq!(store.get(&tp(0)).await, Some(Checkpoint::new(11, 2)));
    }

    #[tokio::test]
    async fn should_skip_flushes_when_cancelled_between_partitions() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let cache = owning(&[tp(0)]);
        cache.with(|c| c.record(&tp(0), 1, 10));
        let ticker = build(store.clone(), cache, Duration::from_secs(1));

        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(ticker.tick(&token).await, 0);
        assert_eq!(store.flush_count(), 0);
    }

    /// Takes its time to write anything, so flushes can be caught half way.
    struct SlowStore {
        inner: MemoryCheckpointStore,
        delay: Duration,
    }

    #[async_trait]
    impl CheckpointStore for SlowStore {
        async fn flush(&self, tp: &TopicPartition, checkpoint: &Checkpoint) -> CheckpointStoreResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.flush(tp, checkpoint).await
        }

        async fn load(&self, tp: &TopicPartition) -> CheckpointStoreResult<Checkpoint> {
            self.inner.load(tp).await
        }
    }

    #[tokio::test]
    async fn should_never_overwrite_checkpoint_flushed_on_revoke() {
        let store = Arc::new(SlowStore {
            inner: MemoryCheckpointStore::new(),
            delay: Duration::from_millis(50),
        });
        let cache = owning(&[tp(0), tp(1)]);
        cache.with(|c| {
            c.record(&tp(0), 1, 1);
            c.record(&tp(1), 1, 5);
        });

        let metrics = ConsumerMetrics::unregistered();
        let ticker = CheckpointTicker::new(store.clone(), cache.clone(), Duration::from_secs(1), metrics.clone());
        let coordinator = RebalanceCoordinator::new(store.clone(), cache.clone(), metrics);

        let token = CancellationToken::new();
        let revoke = async {
            // Let the tick get going with the flush of tp(0)
            tokio::time::sleep(Duration::from_millis(10)).await;
            cache.with(|c| c.record(&tp(1), 1, 9));
            coordinator.revoke(&[tp(1)]).await
        };
        let (ticked, revoked) = tokio::join!(ticker.tick(&token), revoke);

        assert_eq!(revoked, 1);
        assert_eq!(ticked, 1);
        assert_eq!(store.inner.get(&tp(1)).await.map(|cp| cp.last_offset), Some(Some(9)));
        assert_eq!(store.inner.get(&tp(0)).await, Some(Checkpoint::new(1, 1)));
        assert!(!cache.with(|c| c.contains(&tp(1))));
    }
}
