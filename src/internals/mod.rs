mod backoff;

pub use backoff::{retry_with_backoff, BackoffError, BackoffResult};
