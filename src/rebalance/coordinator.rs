use std::sync::Arc;

use async_trait::async_trait;

use super::listener::{ReadPosition, RebalanceListener};
use crate::checkpoint_store::{Checkpoint, CheckpointStore};
use crate::kafka_types::TopicPartition;
use crate::partition_state::SharedPartitionStateCache;
use crate::prometheus_metrics::{ConsumerMetrics, KIND_ASSIGN, KIND_REVOKE, TRIGGER_REVOKE};

/// Keeps the [`SharedPartitionStateCache`] and the [`CheckpointStore`] in line with
/// partition ownership.
///
/// * On revoke, the progress of the revoked partitions is flushed to the store,
///   then dropped from the cache.
/// * On assign, the progress of the assigned partitions is loaded from the store into
///   the cache, and the position to resume reading from is decided.
///
/// Revoke and assign are independent transitions: a partition revoked and then assigned
/// back to this same consumer is simply flushed, dropped, and loaded again.
pub struct RebalanceCoordinator {
    store: Arc<dyn CheckpointStore>,
    cache: SharedPartitionStateCache,
    metrics: ConsumerMetrics,
}

impl RebalanceCoordinator {
    pub fn new(store: Arc<dyn CheckpointStore>, cache: SharedPartitionStateCache, metrics: ConsumerMetrics) -> Self {
        Self {
            store,
            cache,
            metrics,
        }
    }

    /// Flush, then forget, the progress of the `revoked` partitions.
    ///
    /// Returns the amount of partitions successfully flushed.
    pub async fn revoke(&self, revoked: &[TopicPartition]) -> usize {
        info!("Revoked {} partitions: {:?}", revoked.len(), revoked);
        self.metrics.rebalances.with_label_values(&[KIND_REVOKE]).inc_by(revoked.len() as u64);

        // Held until the revoked partitions leave the cache: no periodic flush can land after ours
        let _flushing = self.cache.lock_flushes().await;
        let snapshot = self.cache.with(|c| c.checkpoints_of(revoked));

        let mut flushed = 0;
        for (tp, checkpoint) in snapshot {
            match self.store.flush(&tp, &checkpoint).await {
                Ok(()) => {
                    debug!("Checkpointed revoked {tp}: {checkpoint:?}");
                    self.metrics.flushes.with_label_values(&[TRIGGER_REVOKE]).inc();
                    flushed += 1;
                },
                Err(e) => {
                    // Ownership is lost regardless: the next owner will resume from an older checkpoint
                    error!("Failed to checkpoint revoked {tp}: {e}");
                    self.metrics.flush_failures.with_label_values(&[TRIGGER_REVOKE]).inc();
                },
            }
        }

        let owned = self.cache.with(|c| {
            for tp in revoked {
                c.remove(tp);
            }
            c.len()
        });
        self.metrics.owned_partitions.set(owned as i64);

        flushed
    }

    /// Load the progress of the `assigned` partitions, and decide where to resume them from.
    ///
    /// A partition with a checkpoint resumes right after its `last_offset`; a partition without
    /// (or whose checkpoint can't be read) is replayed from the earliest available record.
    pub async fn assign(&self, assigned: &[TopicPartition]) -> Vec<(TopicPartition, ReadPosition)> {
        info!("Assigned {} partitions: {:?}", assigned.len(), assigned);
        self.metrics.rebalances.with_label_values(&[KIND_ASSIGN]).inc_by(assigned.len() as u64);

        let mut positions = Vec::with_capacity(assigned.len());
        for tp in assigned {
            let checkpoint = match self.store.load(tp).await {
                Ok(cp) => cp,
                Err(e) => {
                    error!("Failed to load checkpoint of {tp}, replaying from earliest: {e}");
                    Checkpoint::absent()
                },
            };

            let position = match checkpoint.resumable_offset() {
                Some(last_offset) => ReadPosition::Offset(last_offset + 1),
                None => ReadPosition::Earliest,
            };
            debug!("Resuming {tp} from {position:?} (checkpoint: {checkpoint:?})");

            self.cache.with(|c| c.populate(tp, &checkpoint));
            positions.push((tp.clone(), position));
        }

        let owned = self.cache.with(|c| c.len());
        self.metrics.owned_partitions.set(owned as i64);

        positions
    }
}

#[async_trait]
impl RebalanceListener for RebalanceCoordinator {
    async fn on_partitions_revoked(&self, revoked: &[TopicPartition]) {
        self.revoke(revoked).await;
    }

    async fn on_partitions_assigned(&self, assigned: &[TopicPartition]) -> Vec<(TopicPartition, ReadPosition)> {
        self.assign(assigned).await
    }
}
