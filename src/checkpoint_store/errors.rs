use thiserror::Error;

use crate::internals::BackoffError;

/// Possible errors from a [`super::CheckpointStore`].
#[derive(Error, Debug)]
pub enum CheckpointStoreError {
    /// The Redis backend failed to execute a command.
    #[error("Redis failure: {0}")]
    Redis(#[from] redis::RedisError),

    /// A value read from the store could not be decoded.
    #[error("Malformed value at '{key}': {reason}")]
    Malformed { key: String, reason: String },

    /// The store location could not be understood.
    #[error("Unsupported Checkpoint Store location '{0}'")]
    UnsupportedLocation(String),

    /// Connecting was abandoned before it could succeed.
    #[error("Unable to connect: {0}")]
    Connect(#[from] BackoffError),

    /// The store is (temporarily) not reachable.
    #[error("Checkpoint Store unavailable: {0}")]
    Unavailable(String),
}

pub type CheckpointStoreResult<T> = Result<T, CheckpointStoreError>;
