// Inner modules
mod errors;
mod keys;
mod memory;
mod redis_store;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::kafka_types::TopicPartition;

// Exports
pub use errors::{CheckpointStoreError, CheckpointStoreResult};
pub use keys::CheckpointKeys;
pub use memory::MemoryCheckpointStore;
pub use redis_store::RedisCheckpointStore;

/// Scheme of a [`CheckpointStore`] location that selects [`MemoryCheckpointStore`].
pub const MEMORY_STORE_SCHEME: &str = "memory://";

const REDIS_STORE_SCHEMES: [&str; 3] = ["redis://", "rediss://", "redis+unix://"];

/// Durable progress of a Topic Partition, as persisted in a [`CheckpointStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Checkpoint {
    /// Offset of the last record processed, `None` if never checkpointed.
    pub last_offset: Option<i64>,
    /// Amount of records accounted for, as of this checkpoint.
    pub counts: u64,
}

impl Checkpoint {
    pub fn new(last_offset: i64, counts: u64) -> Self {
        Self {
            last_offset: Some(last_offset),
            counts,
        }
    }

    /// The "never flushed" sentinel.
    pub fn absent() -> Self {
        Self::default()
    }

    /// Offset that can be resumed from, if any.
    ///
    /// Negative offsets are considered equivalent to "no progress".
    pub fn resumable_offset(&self) -> Option<i64> {
        self.last_offset.filter(|o| *o >= 0)
    }
}

/// Durable key-value storage of [`Checkpoint`]s, keyed by [`TopicPartition`].
///
/// Implementations must write both fields of a [`Checkpoint`] atomically: a failed
/// [`Self::flush`] leaves the previous [`Checkpoint`] in place.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist `checkpoint` for `tp`, overwriting whatever was there.
    async fn flush(&self, tp: &TopicPartition, checkpoint: &Checkpoint) -> CheckpointStoreResult<()>;

    /// Read the most recent [`Checkpoint`] of `tp`, or [`Checkpoint::absent`] if never flushed.
    async fn load(&self, tp: &TopicPartition) -> CheckpointStoreResult<Checkpoint>;
}

/// Create the [`CheckpointStore`] at `location`, picking the implementation from its scheme.
///
/// # Arguments
///
/// * `location` - `memory://`, or a Redis URL (i.e. `redis://localhost:6379/0`)
/// * `namespace` - Prefix of all the keys written and read
/// * `backoff` - Delay between connection attempts
/// * `shutdown_token` - Interrupts the connection attempts
pub async fn connect(
    location: &str,
    namespace: &str,
    backoff: Duration,
    shutdown_token: &CancellationToken,
) -> CheckpointStoreResult<Arc<dyn CheckpointStore>> {
    if location.starts_with(MEMORY_STORE_SCHEME) {
        warn!("Checkpoints are kept in memory: every restart replays all partitions from the earliest offset");
        return Ok(Arc::new(MemoryCheckpointStore::new()));
    }

    if REDIS_STORE_SCHEMES.iter().any(|scheme| location.starts_with(scheme)) {
        let store = RedisCheckpointStore::connect(location, namespace, backoff, shutdown_token).await?;
        return Ok(Arc::new(store));
    }

    Err(CheckpointStoreError::UnsupportedLocation(location.to_string()))
}
