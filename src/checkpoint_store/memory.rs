use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::errors::{CheckpointStoreError, CheckpointStoreResult};
use super::{Checkpoint, CheckpointStore};
use crate::kafka_types::TopicPartition;

/// A [`CheckpointStore`] that keeps [`Checkpoint`]s in process memory.
///
/// Nothing survives a restart: useful for local runs, where replaying from the
/// earliest offset at every start is acceptable, and for tests.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<TopicPartition, Checkpoint>>,
    flushes: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding the given `checkpoints`.
    pub fn with_checkpoints<I: IntoIterator<Item = (TopicPartition, Checkpoint)>>(checkpoints: I) -> Self {
        Self {
            checkpoints: RwLock::new(checkpoints.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Amount of successful [`CheckpointStore::flush`] calls served so far.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Make every following call fail (or succeed again), simulating an outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current [`Checkpoint`] of `tp`, if any was ever flushed.
    pub async fn get(&self, tp: &TopicPartition) -> Option<Checkpoint> {
        self.checkpoints.read().await.get(tp).copied()
    }

    fn ensure_available(&self) -> CheckpointStoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CheckpointStoreError::Unavailable("in-memory store marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn flush(&self, tp: &TopicPartition, checkpoint: &Checkpoint) -> CheckpointStoreResult<()> {
        self.ensure_available()?;

        self.checkpoints.write().await.insert(tp.clone(), *checkpoint);
        self.flushes.fetch_add(1, Ordering::SeqCst);
        trace!("Flushed {tp}: {checkpoint:?}");
        Ok(())
    }

    async fn load(&self, tp: &TopicPartition) -> CheckpointStoreResult<Checkpoint> {
        self.ensure_available()?;

        Ok(self.checkpoints.read().await.get(tp).copied().unwrap_or_else(Checkpoint::absent))
    }
}
