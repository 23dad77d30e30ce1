use async_trait::async_trait;

use crate::kafka_types::TopicPartition;

/// Where the broker client should resume reading a Topic Partition from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPosition {
    /// The earliest record still available on the broker.
    Earliest,
    /// A specific offset.
    Offset(i64),
}

/// Receives partition ownership changes from the broker client.
///
/// The broker client must not resume until these have returned: on revoke, ownership
/// may be handed to another consumer right after; on assign, the returned
/// [`ReadPosition`]s have to be applied before any record is fetched.
#[async_trait]
pub trait RebalanceListener: Send + Sync {
    /// The given partitions are about to be taken away from this consumer.
    async fn on_partitions_revoked(&self, revoked: &[TopicPartition]);

    /// The given partitions have been assigned to this consumer.
    ///
    /// Returns where each of them should be read from.
    async fn on_partitions_assigned(&self, assigned: &[TopicPartition]) -> Vec<(TopicPartition, ReadPosition)>;
}
