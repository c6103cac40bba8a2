//! Convenient re-exports for common Rebound types.
pub use crate::{
    backoff::{Backoff, BackoffExt, Constant, Exponential, Fibonacci},
    error::{retryable, AttemptError, BackoffError, RetryError},
    jitter::RandomSource,
    retry::{repeat, retry, retry_value, Attempt, Executor},
};
pub use tokio_util::sync::CancellationToken;
