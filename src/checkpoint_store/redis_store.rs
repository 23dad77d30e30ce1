use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::errors::CheckpointStoreResult;
use super::keys::{decode_counts, decode_offset, encode_counts, CheckpointKeys};
use super::{Checkpoint, CheckpointStore};
use crate::internals::retry_with_backoff;
use crate::kafka_types::TopicPartition;

/// A [`CheckpointStore`] backed by Redis.
///
/// Each [`Checkpoint`] is stored as 2 string keys (see [`CheckpointKeys`]), always written
/// together inside a `MULTI`/`EXEC` transaction.
pub struct RedisCheckpointStore {
    connection: MultiplexedConnection,
    keys: CheckpointKeys,
}

impl RedisCheckpointStore {
    /// Connect to the Redis instance at `url`.
    ///
    /// An invalid `url` fails immediately. Connection failures are instead retried
    /// every `backoff`, until connected or until `shutdown_token` is cancelled.
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (i.e. `redis://localhost:6379/0`)
    /// * `namespace` - Prefix of all the keys written and read
    /// * `backoff` - Delay between connection attempts
    /// * `shutdown_token` - Interrupts the connection attempts
    pub async fn connect(
        url: &str,
        namespace: &str,
        backoff: Duration,
        shutdown_token: &CancellationToken,
    ) -> CheckpointStoreResult<Self> {
        let client = redis::Client::open(url)?;

        let connection = retry_with_backoff("Redis Checkpoint Store", backoff, shutdown_token, || {
            client.get_multiplexed_async_connection()
        })
        .await?;

        Ok(Self {
            connection,
            keys: CheckpointKeys::new(namespace),
        })
    }
}

#[async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn flush(&self, tp: &TopicPartition, checkpoint: &Checkpoint) -> CheckpointStoreResult<()> {
        let mut conn = self.connection.clone();

        redis::pipe()
            .atomic()
            .set(self.keys.last_offset(tp), checkpoint.last_offset.unwrap_or(-1))
            .ignore()
            .set(self.keys.counts(tp), encode_counts(tp, checkpoint.counts))
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        trace!("Flushed {tp}: {checkpoint:?}");
        Ok(())
    }

    async fn load(&self, tp: &TopicPartition) -> CheckpointStoreResult<Checkpoint> {
        let offset_key = self.keys.last_offset(tp);
        let counts_key = self.keys.counts(tp);
        let mut conn = self.connection.clone();

        let (raw_offset, raw_counts): (Option<String>, Option<String>) =
            redis::pipe().get(&offset_key).get(&counts_key).query_async(&mut conn).await?;

        let last_offset = raw_offset.map(|raw| decode_offset(&offset_key, &raw)).transpose()?;

        // Counts are telemetry: a broken ledger must not prevent resuming from `last_offset`
        let counts = match raw_counts.map(|raw| decode_counts(tp, &counts_key, &raw)).transpose() {
            Ok(c) => c.unwrap_or(0),
            Err(e) => {
                warn!("Ignoring counts of {tp}: {e}");
                0
            },
        };

        Ok(Checkpoint {
            last_offset,
            counts,
        })
    }
}
