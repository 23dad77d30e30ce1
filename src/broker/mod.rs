// Inner modules
mod errors;
#[cfg(unix)]
mod kafka;
#[cfg(test)]
pub mod mock;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Duration;

use crate::kafka_types::{Record, TopicPartition};
use crate::rebalance::RebalanceListener;

// Exports
pub use errors::{BrokerError, BrokerResult, PollError};
#[cfg(unix)]
pub use kafka::{KafkaBroker, KafkaBrokerSettings};

/// Records returned by a single [`BrokerClient::poll`], grouped by [`TopicPartition`].
///
/// Within a partition, records are in arrival (offset) order.
pub type PolledBatch = BTreeMap<TopicPartition, Vec<Record>>;

/// Client of the event log the consumer reads from.
///
/// Partition ownership is decided by the broker (consumer group protocol), and notified
/// through the [`RebalanceListener`] given at [`Self::subscribe`]: notifications are delivered
/// from within [`Self::poll`], and [`Self::poll`] does not return records of newly assigned
/// partitions until the listener has returned.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Join the consumer group, consuming from `topics`.
    async fn subscribe(&self, topics: &[String], listener: Arc<dyn RebalanceListener>) -> BrokerResult<()>;

    /// Fetch the next batch of records across all owned partitions.
    ///
    /// Returns an empty [`PolledBatch`] if nothing arrived within `timeout`.
    async fn poll(&self, timeout: Duration) -> Result<PolledBatch, PollError>;

    /// Move the read position of `tps` to the earliest record still available.
    async fn seek_to_earliest(&self, tps: &[TopicPartition]) -> BrokerResult<()>;

    /// Move the read position of `tp` to `offset`.
    async fn seek(&self, tp: &TopicPartition, offset: i64) -> BrokerResult<()>;

    /// Leave the consumer group.
    ///
    /// Owned partitions are revoked (so the listener gets to flush their progress) before returning.
    async fn stop(&self);
}

/// Group a sequence of records by [`TopicPartition`], preserving their relative order.
pub fn group_records<I: IntoIterator<Item = Record>>(records: I) -> PolledBatch {
    let mut batch = PolledBatch::new();
    for r in records {
        batch.entry(r.topic_partition()).or_default().push(r);
    }
    batch
}
