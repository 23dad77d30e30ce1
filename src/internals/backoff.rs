use std::fmt::Display;
use std::future::Future;

use thiserror::Error;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

/// Keep calling `attempt` until it succeeds, sleeping `backoff` after every failure.
///
/// Meant for establishing connections at startup, where failures are assumed to be
/// transient (i.e. the service is still booting). There is no limit on the amount of
/// attempts: the only way to give up is to cancel the given [`CancellationToken`],
/// in which case [`BackoffError::Cancelled`] is returned.
///
/// # Arguments
///
/// * `what` - Human readable name of what we are trying to reach, for logging
/// * `backoff` - Fixed delay between attempts
/// * `shutdown_token` - Interrupts the retry loop, even mid-sleep
/// * `attempt` - Produces a new connection attempt every time it's called
pub async fn retry_with_backoff<T, E, F, Fut>(
    what: &str,
    backoff: Duration,
    shutdown_token: &CancellationToken,
    mut attempt: F,
) -> BackoffResult<T>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempts: u64 = 0;
    loop {
        if shutdown_token.is_cancelled() {
            return Err(BackoffError::Cancelled(what.to_string()));
        }

        attempts += 1;
        match attempt().await {
            Ok(v) => {
                info!("Connected to {what} (attempt #{attempts})");
                return Ok(v);
            },
            Err(e) => {
                warn!("Failed to connect to {what} (attempt #{attempts}): {e} - retrying in {backoff:?}");
            },
        }

        tokio::select! {
            _ = sleep(backoff) => {
                // No-op
            },
            _ = shutdown_token.cancelled() => {
                warn!("Received shutdown signal before connecting to {what}");
                return Err(BackoffError::Cancelled(what.to_string()));
            },
        }
    }
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum BackoffError {
    #[error("Cancelled before connecting to {0}")]
    Cancelled(String),
}

pub type BackoffResult<T> = Result<T, BackoffError>;
