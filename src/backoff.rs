//! Backoff protocol and base algorithms.
//!
//! A [`Backoff`] is a stateful delay generator: every call to [`Backoff::next`] advances its
//! internal state and yields either the delay to wait before the next attempt, or `None` to stop.
//! Base algorithms never stop on their own; termination comes from middleware such as
//! [`MaxRetries`](crate::MaxRetries) or [`MaxDuration`](crate::MaxDuration).
//!
//! All implementations are safe for concurrent use. Concurrent callers sharing one instance
//! observe a linearizable sequence: no two callers see the same successor state.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use rebound::{Backoff, BackoffExt, Fibonacci};
//!
//! let backoff = Fibonacci::new(Duration::from_millis(100))
//!     .unwrap()
//!     .with_capped_duration(Duration::from_millis(250))
//!     .with_max_retries(4);
//! assert_eq!(backoff.next(), Some(Duration::from_millis(100)));
//! assert_eq!(backoff.next(), Some(Duration::from_millis(100)));
//! assert_eq!(backoff.next(), Some(Duration::from_millis(200)));
//! assert_eq!(backoff.next(), Some(Duration::from_millis(250))); // capped
//! assert_eq!(backoff.next(), None); // retries exhausted
//! ```
//!
//! Overflow behavior: growth saturates at `Duration::MAX` instead of wrapping.

use crate::clock::MonotonicClock;
use crate::error::BackoffError;
use crate::jitter::{Jitter, JitterPercent, RandomSource};
use crate::middleware::{CappedDuration, MaxDuration, MaxRetries};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Produces the next delay, or `None` to stop retrying.
pub trait Backoff: Send + Sync {
    fn next(&self) -> Option<Duration>;
}

impl<B: Backoff + ?Sized> Backoff for &B {
    fn next(&self) -> Option<Duration> {
        (**self).next()
    }
}

impl<B: Backoff + ?Sized> Backoff for Box<B> {
    fn next(&self) -> Option<Duration> {
        (**self).next()
    }
}

impl<B: Backoff + ?Sized> Backoff for Arc<B> {
    fn next(&self) -> Option<Duration> {
        (**self).next()
    }
}

/// Convert nanoseconds to a `Duration`, saturating at `Duration::MAX`.
pub(crate) fn saturating_from_nanos(nanos: u128) -> Duration {
    let secs = nanos / NANOS_PER_SEC;
    match u64::try_from(secs) {
        Ok(secs) => Duration::new(secs, (nanos % NANOS_PER_SEC) as u32),
        Err(_) => Duration::MAX,
    }
}

/// Backoff expressed as a closure. Useful for custom middleware and tests.
pub struct BackoffFn<F> {
    f: F,
}

impl<F> fmt::Debug for BackoffFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffFn").finish_non_exhaustive()
    }
}

impl<F> Backoff for BackoffFn<F>
where
    F: Fn() -> Option<Duration> + Send + Sync,
{
    fn next(&self) -> Option<Duration> {
        (self.f)()
    }
}

/// Wrap a closure as a [`Backoff`].
pub fn backoff_fn<F>(f: F) -> BackoffFn<F>
where
    F: Fn() -> Option<Duration> + Send + Sync,
{
    BackoffFn { f }
}

fn require_positive(base: Duration) -> Result<(), BackoffError> {
    if base.is_zero() {
        return Err(BackoffError::invalid("base", "must be greater than zero"));
    }
    Ok(())
}

/// Waits `base` between every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constant {
    base: Duration,
}

impl Constant {
    /// Returns an error if `base` is zero.
    pub fn new(base: Duration) -> Result<Self, BackoffError> {
        require_positive(base)?;
        Ok(Self { base })
    }

    pub fn base(&self) -> Duration {
        self.base
    }
}

impl Backoff for Constant {
    fn next(&self) -> Option<Duration> {
        Some(self.base)
    }
}

/// Doubles the delay on each call: `base * 2^(n-1)` for the n-th call.
#[derive(Debug)]
pub struct Exponential {
    base: Duration,
    attempt: AtomicU64,
}

impl Exponential {
    /// Returns an error if `base` is zero.
    pub fn new(base: Duration) -> Result<Self, BackoffError> {
        require_positive(base)?;
        Ok(Self { base, attempt: AtomicU64::new(0) })
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    fn scaled(&self, exponent: u64) -> Duration {
        if exponent >= u128::BITS as u64 {
            return Duration::MAX;
        }
        self.base
            .as_nanos()
            .checked_mul(1u128 << exponent)
            .map(saturating_from_nanos)
            .unwrap_or(Duration::MAX)
    }
}

impl Backoff for Exponential {
    fn next(&self) -> Option<Duration> {
        let exponent = match self.attempt.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |a| {
            Some(a.saturating_add(1))
        }) {
            Ok(prev) | Err(prev) => prev,
        };
        Some(self.scaled(exponent))
    }
}

/// Grows as the Fibonacci sequence scaled by `base`: `1, 1, 2, 3, 5, 8, ...` times `base`.
#[derive(Debug)]
pub struct Fibonacci {
    base: Duration,
    // (previous, current)
    state: Mutex<(Duration, Duration)>,
}

impl Fibonacci {
    /// Returns an error if `base` is zero.
    pub fn new(base: Duration) -> Result<Self, BackoffError> {
        require_positive(base)?;
        Ok(Self { base, state: Mutex::new((Duration::ZERO, base)) })
    }

    pub fn base(&self) -> Duration {
        self.base
    }
}

impl Backoff for Fibonacci {
    fn next(&self) -> Option<Duration> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (prev, curr) = *state;
        *state = (curr, prev.saturating_add(curr));
        Some(curr)
    }
}

/// Chaining helpers that wrap a backoff in middleware.
///
/// Each call wraps `self`, so the last call is the outermost layer and sees the output of
/// everything before it.
pub trait BackoffExt: Backoff + Sized {
    /// Add `[0, jitter)` when `add_only`, otherwise `[-jitter, jitter)`, clamped at zero.
    fn with_jitter(self, jitter: Duration, add_only: bool) -> Jitter<Self> {
        Jitter::new(jitter, add_only, self)
    }

    /// Like [`with_jitter`](Self::with_jitter) but drawing from a caller-provided source.
    fn with_jitter_from(self, jitter: Duration, add_only: bool, rng: RandomSource) -> Jitter<Self> {
        Jitter::with_source(jitter, add_only, self, rng)
    }

    /// Scale the delay by up to `percent`%. Errors if `percent > 100`.
    fn with_jitter_percent(
        self,
        percent: u64,
        add_only: bool,
    ) -> Result<JitterPercent<Self>, BackoffError> {
        JitterPercent::new(percent, add_only, self)
    }

    /// Stop after `max` delays have been handed out.
    fn with_max_retries(self, max: u64) -> MaxRetries<Self> {
        MaxRetries::new(max, self)
    }

    /// Replace zero or larger-than-`cap` delays with `cap`.
    fn with_capped_duration(self, cap: Duration) -> CappedDuration<Self> {
        CappedDuration::new(cap, self)
    }

    /// Stop once `timeout` has elapsed since this call; clamp delays to the remaining budget.
    fn with_max_duration(self, timeout: Duration) -> MaxDuration<Self, MonotonicClock> {
        MaxDuration::new(timeout, self)
    }
}

impl<B: Backoff> BackoffExt for B {}
