#[cfg(unix)]
use rdkafka::error::KafkaError;
use thiserror::Error;

use crate::internals::BackoffError;
use crate::kafka_types::TopicPartition;

/// Possible errors from a [`super::BrokerClient`].
#[derive(Error, Debug)]
pub enum BrokerError {
    #[cfg(unix)]
    #[error("Kafka failure: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Unable to connect: {0}")]
    Connect(#[from] BackoffError),

    #[error("Consumer is already subscribed")]
    AlreadySubscribed,

    #[error("Failed to seek {tp}: {reason}")]
    Seek { tp: TopicPartition, reason: String },
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Possible outcomes of a failed [`super::BrokerClient::poll`].
///
/// Only [`PollError::Fatal`] is meant to stop the consumer: the others are recovered
/// from by the poll loop.
#[derive(Error, Debug)]
pub enum PollError {
    /// The read position of these partitions is no longer available on the broker.
    #[error("Offset out of range for {0:?}")]
    OffsetOutOfRange(Vec<TopicPartition>),

    /// There is no position to resume this partition from.
    #[error("No committed offset for {0}")]
    NoCommittedOffset(TopicPartition),

    /// Polling failed, but might succeed if tried again.
    #[error("Transient poll failure: {0}")]
    Transient(String),

    #[error(transparent)]
    Fatal(#[from] BrokerError),
}
