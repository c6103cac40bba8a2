//! Cancellation-aware retry executor.
//!
//! Semantics:
//! - The operation receives an [`Attempt`] describing which try this is (`retries()` is 0 on
//!   the first call and increments only after a completed wait).
//! - `Ok` ends the loop. [`AttemptError::Permanent`] is returned as-is without consulting the
//!   backoff. [`AttemptError::Retryable`] asks the backoff for the next delay.
//! - When the backoff stops, the unwrapped cause of the last retryable failure is returned as
//!   [`RetryError::Failed`]. There is no separate "exhausted" error; callers that must tell the
//!   two apart have to inspect the cause.
//! - Cancellation is checked before every attempt, before arming the wait, and during the wait.
//!   Once observed it wins over any pending operation error and yields [`RetryError::Cancelled`].
//!   An attempt already in flight is never interrupted; the token is handed to it through
//!   [`Attempt::cancellation`] so it can cooperate.
//!
//! Invariants:
//! - Attempts are strictly sequential.
//! - The backoff is consulted exactly once per retryable failure.
//! - The sleeper is invoked exactly once per retry.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use rebound::{retry, retryable, BackoffExt, Fibonacci};
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! struct MyErr;
//! impl std::fmt::Display for MyErr { fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "oops") } }
//! impl std::error::Error for MyErr {}
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let backoff = Fibonacci::new(Duration::from_millis(1)).unwrap().with_max_retries(3);
//! let token = CancellationToken::new();
//! let result = retry(&token, backoff, |attempt| async move {
//!     if attempt.retries() < 2 {
//!         return Err(retryable(MyErr));
//!     }
//!     Ok(())
//! })
//! .await;
//! assert!(result.is_ok());
//! # });
//! ```

use crate::backoff::{Backoff, Constant, Exponential, Fibonacci};
use crate::error::{AttemptError, RetryError};
use crate::sleeper::{Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Describes the attempt an operation is being invoked for.
#[derive(Debug, Clone)]
pub struct Attempt {
    retries: u64,
    cancellation: CancellationToken,
}

impl Attempt {
    /// Number of retries so far; `0` for the initial call.
    pub fn retries(&self) -> u64 {
        self.retries
    }

    pub fn is_first(&self) -> bool {
        self.retries == 0
    }

    /// Fires when the executor's token is cancelled. Cancelling this handle only affects the
    /// current attempt.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// Drives operations against a backoff, waiting between attempts with a [`Sleeper`].
#[derive(Debug, Clone)]
pub struct Executor {
    sleeper: Arc<dyn Sleeper>,
}

impl Default for Executor {
    fn default() -> Self {
        Self { sleeper: Arc::new(TokioSleeper) }
    }
}

impl Executor {
    /// Executor that waits on the tokio timer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Retry `operation` until it succeeds, fails permanently, the backoff stops, or `cancel`
    /// fires. Returns the operation's value on success.
    pub async fn execute_value<T, E, B, Op, Fut>(
        &self,
        cancel: &CancellationToken,
        backoff: B,
        mut operation: Op,
    ) -> Result<T, RetryError<E>>
    where
        B: Backoff,
        Op: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<T, AttemptError<E>>>,
    {
        let mut retries: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                tracing::debug!(retries, "retry cancelled before attempt");
                return Err(RetryError::Cancelled);
            }

            let attempt = Attempt { retries, cancellation: cancel.child_token() };
            let delay = {
                let cause = match operation(attempt).await {
                    Ok(value) => return Ok(value),
                    Err(AttemptError::Permanent(err)) => {
                        tracing::debug!(retries, "non-retryable failure");
                        return Err(RetryError::Failed(err));
                    }
                    Err(AttemptError::Retryable(err)) => err.into_inner(),
                };
                match backoff.next() {
                    Some(delay) => delay,
                    None => {
                        tracing::debug!(retries, "backoff stopped; returning last failure");
                        return Err(RetryError::Failed(cause));
                    }
                }
            };

            if !self.pause(cancel, delay, retries).await {
                return Err(RetryError::Cancelled);
            }
            retries = retries.saturating_add(1);
        }
    }

    /// [`execute_value`](Self::execute_value) for operations without a result value.
    pub async fn execute<E, B, Op, Fut>(
        &self,
        cancel: &CancellationToken,
        backoff: B,
        operation: Op,
    ) -> Result<(), RetryError<E>>
    where
        B: Backoff,
        Op: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<(), AttemptError<E>>>,
    {
        self.execute_value(cancel, backoff, operation).await
    }

    /// Run `operation` repeatedly while it succeeds.
    ///
    /// Inverted polarity from [`execute`](Self::execute): an error from the operation ends the
    /// loop and is returned, while the backoff stopping ends it with `Ok(())`.
    pub async fn repeat<E, B, Op, Fut>(
        &self,
        cancel: &CancellationToken,
        backoff: B,
        mut operation: Op,
    ) -> Result<(), RetryError<E>>
    where
        B: Backoff,
        Op: FnMut(Attempt) -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let mut iteration: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                tracing::debug!(iteration, "repeat cancelled before run");
                return Err(RetryError::Cancelled);
            }

            let attempt = Attempt { retries: iteration, cancellation: cancel.child_token() };
            if let Err(err) = operation(attempt).await {
                tracing::debug!(iteration, "repeat stopped by operation error");
                return Err(RetryError::Failed(err));
            }

            let Some(delay) = backoff.next() else {
                tracing::debug!(iteration, "repeat finished; backoff stopped");
                return Ok(());
            };

            if !self.pause(cancel, delay, iteration).await {
                return Err(RetryError::Cancelled);
            }
            iteration = iteration.saturating_add(1);
        }
    }

    /// Wait out `delay` unless `cancel` fires first. Returns `false` on cancellation.
    async fn pause(&self, cancel: &CancellationToken, delay: Duration, retries: u64) -> bool {
        // Checked alone first so an already-cancelled token never arms the timer.
        if cancel.is_cancelled() {
            tracing::debug!(retries, "retry cancelled before wait");
            return false;
        }

        tracing::trace!(retries, ?delay, "waiting before next attempt");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(retries, "retry cancelled during wait");
                false
            }
            _ = self.sleeper.sleep(delay) => true,
        }
    }
}

/// Retry with the tokio timer. See [`Executor::execute_value`].
pub async fn retry_value<T, E, B, Op, Fut>(
    cancel: &CancellationToken,
    backoff: B,
    operation: Op,
) -> Result<T, RetryError<E>>
where
    B: Backoff,
    Op: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T, AttemptError<E>>>,
{
    Executor::default().execute_value(cancel, backoff, operation).await
}

/// Retry with the tokio timer. See [`Executor::execute`].
pub async fn retry<E, B, Op, Fut>(
    cancel: &CancellationToken,
    backoff: B,
    operation: Op,
) -> Result<(), RetryError<E>>
where
    B: Backoff,
    Op: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<(), AttemptError<E>>>,
{
    Executor::default().execute(cancel, backoff, operation).await
}

/// Repeat with the tokio timer. See [`Executor::repeat`].
pub async fn repeat<E, B, Op, Fut>(
    cancel: &CancellationToken,
    backoff: B,
    operation: Op,
) -> Result<(), RetryError<E>>
where
    B: Backoff,
    Op: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    Executor::default().repeat(cancel, backoff, operation).await
}

/// [`retry`] with a [`Constant`] backoff of `base`.
pub async fn retry_constant<E, Op, Fut>(
    cancel: &CancellationToken,
    base: Duration,
    operation: Op,
) -> Result<(), RetryError<E>>
where
    Op: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<(), AttemptError<E>>>,
{
    let backoff = Constant::new(base).map_err(RetryError::InvalidBackoff)?;
    retry(cancel, backoff, operation).await
}

/// [`retry`] with an [`Exponential`] backoff starting at `base`. Unbounded; the operation or
/// the token must end the loop.
pub async fn retry_exponential<E, Op, Fut>(
    cancel: &CancellationToken,
    base: Duration,
    operation: Op,
) -> Result<(), RetryError<E>>
where
    Op: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<(), AttemptError<E>>>,
{
    let backoff = Exponential::new(base).map_err(RetryError::InvalidBackoff)?;
    retry(cancel, backoff, operation).await
}

/// [`retry`] with a [`Fibonacci`] backoff starting at `base`.
pub async fn retry_fibonacci<E, Op, Fut>(
    cancel: &CancellationToken,
    base: Duration,
    operation: Op,
) -> Result<(), RetryError<E>>
where
    Op: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<(), AttemptError<E>>>,
{
    let backoff = Fibonacci::new(base).map_err(RetryError::InvalidBackoff)?;
    retry(cancel, backoff, operation).await
}
