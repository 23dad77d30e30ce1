use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use super::state::{PartitionState, NO_OFFSET};
use crate::checkpoint_store::Checkpoint;
use crate::kafka_types::TopicPartition;

/// Progress of all the Topic Partitions currently owned by this consumer.
///
/// Mutated by the poll loop (one [`Self::record`] per consumed record), by the rebalance
/// coordinator (populate on assign, remove on revoke) and read by the checkpoint ticker.
/// See [`SharedPartitionStateCache`] for how it is shared between them.
#[derive(Debug, Default)]
pub struct PartitionStateCache {
    states: HashMap<TopicPartition, PartitionState>,
}

impl PartitionStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for `delta_count` more records in the open window of `tp`, the last being `new_offset`.
    ///
    /// Records of a partition that is not tracked (i.e. not owned) are ignored: returns `false`.
    pub fn record(&mut self, tp: &TopicPartition, delta_count: u64, new_offset: i64) -> bool {
        match self.states.get_mut(tp) {
            Some(state) => {
                state.window_count = state.window_count.saturating_add(delta_count);
                state.last_offset = new_offset;
                true
            },
            None => false,
        }
    }

    /// Windows open implicitly when the previous one closes: this exists for symmetry.
    pub fn open_window(&mut self, _tp: &TopicPartition) {}

    /// Fold the open window of `tp` into its cumulative count.
    ///
    /// Returns the amount of records the closed window contained.
    pub fn close_window(&mut self, tp: &TopicPartition) -> u64 {
        match self.states.get_mut(tp) {
            Some(state) => {
                let closed = state.window_count;
                state.cumulative_count = state.cumulative_count.saturating_add(closed);
                state.window_count = 0;
                closed
            },
            None => 0,
        }
    }

    /// Forget all progress of `tp`: its next checkpoint will resume from nothing.
    pub fn discard(&mut self, tp: &TopicPartition) {
        if let Some(state) = self.states.get_mut(tp) {
            *state = PartitionState::default();
        }
    }

    /// (Re)initialize `tp` from a freshly loaded `checkpoint`, with an empty window.
    pub fn populate(&mut self, tp: &TopicPartition, checkpoint: &Checkpoint) {
        self.states.insert(tp.clone(), PartitionState::from_checkpoint(checkpoint));
    }

    /// Stop tracking `tp`, returning its last known state.
    pub fn remove(&mut self, tp: &TopicPartition) -> Option<PartitionState> {
        self.states.remove(tp)
    }

    pub fn get(&self, tp: &TopicPartition) -> Option<PartitionState> {
        self.states.get(tp).copied()
    }

    pub fn contains(&self, tp: &TopicPartition) -> bool {
        self.states.contains_key(tp)
    }

    /// Last offset processed for `tp`, or [`NO_OFFSET`] if unknown.
    pub fn last_offset(&self, tp: &TopicPartition) -> i64 {
        self.states.get(tp).map(|s| s.last_offset).unwrap_or(NO_OFFSET)
    }

    /// Size of the open window of `tp`.
    pub fn window_count(&self, tp: &TopicPartition) -> u64 {
        self.states.get(tp).map(|s| s.window_count).unwrap_or(0)
    }

    /// Snapshot of the [`Checkpoint`] of every tracked partition, sorted by partition.
    pub fn checkpoints(&self) -> Vec<(TopicPartition, Checkpoint)> {
        let mut res: Vec<(TopicPartition, Checkpoint)> =
            self.states.iter().map(|(tp, s)| (tp.clone(), s.to_checkpoint())).collect();
        res.sort_by(|a, b| a.0.cmp(&b.0));
        res
    }

    /// Snapshot of the [`Checkpoint`] of `tp`, if tracked.
    pub fn checkpoint_of(&self, tp: &TopicPartition) -> Option<Checkpoint> {
        self.states.get(tp).map(PartitionState::to_checkpoint)
    }

    /// Snapshot of the [`Checkpoint`] of the given partitions, skipping the untracked ones.
    pub fn checkpoints_of(&self, tps: &[TopicPartition]) -> Vec<(TopicPartition, Checkpoint)> {
        tps.iter()
            .filter_map(|tp| self.states.get(tp).map(|s| (tp.clone(), s.to_checkpoint())))
            .collect()
    }

    /// Snapshot of the state of every tracked partition, sorted by partition.
    pub fn states(&self) -> Vec<(TopicPartition, PartitionState)> {
        let mut res: Vec<(TopicPartition, PartitionState)> =
            self.states.iter().map(|(tp, s)| (tp.clone(), *s)).collect();
        res.sort_by(|a, b| a.0.cmp(&b.0));
        res
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// A [`PartitionStateCache`], wrapped in a [`Mutex`] for cross thread concurrency.
///
/// Rebalance callbacks are delivered by the Kafka client synchronously, from within a poll,
/// so a blocking [`Mutex`] is used instead of an async one. The lock is only ever held for
/// the duration of a [`Self::with`] closure: callers snapshot what they need and release it
/// before doing any I/O.
///
/// Flushes of the cache to a checkpoint store are serialized separately, via [`Self::lock_flushes`]:
/// whoever holds it can snapshot a partition, write it out, and know no other flush of it
/// interleaves.
#[derive(Debug, Clone, Default)]
pub struct SharedPartitionStateCache {
    inner: Arc<Mutex<PartitionStateCache>>,
    flush_lock: Arc<AsyncMutex<()>>,
}

impl SharedPartitionStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the [`PartitionStateCache`].
    pub fn with<R, F: FnOnce(&mut PartitionStateCache) -> R>(&self, f: F) -> R {
        f(&mut self.lock())
    }

    /// Acquire exclusive right to flush checkpoints, held until the returned guard is dropped.
    pub async fn lock_flushes(&self) -> AsyncMutexGuard<'_, ()> {
        self.flush_lock.lock().await
    }

    // A panic while holding the lock can't leave the map half-updated:
    // every mutation is a single insert/remove/field assignment.
    fn lock(&self) -> MutexGuard<'_, PartitionStateCache> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
