//! Backoff middleware: limits, caps, and reset.
//!
//! Each middleware wraps another [`Backoff`] and observes or transforms its output before
//! returning it. Jitter lives in [`crate::jitter`].
//!
//! Semantics:
//! - [`MaxRetries`] hands out at most `max` delays, then stops without consulting the inner
//!   backoff.
//! - [`CappedDuration`] bounds each individual delay; it is not a total budget and never stops.
//! - [`MaxDuration`] is a best-effort total budget measured from construction. Elapsed time is
//!   only sampled when `next` is called, so it is not an exact deadline.
//! - [`Resettable`] rebuilds the wrapped chain from a factory, restoring every counter and
//!   clock inside it.
//!
//! Retryability is not a backoff concern: the executor classifies errors before it ever asks
//! the backoff for a delay, so the chain deals purely in timing.

use crate::backoff::Backoff;
use crate::clock::{Clock, MonotonicClock};
use crate::error::BackoffError;
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Stops after `max` delays.
#[derive(Debug)]
pub struct MaxRetries<B> {
    max: u64,
    attempt: Mutex<u64>,
    next: B,
}

impl<B: Backoff> MaxRetries<B> {
    pub fn new(max: u64, next: B) -> Self {
        Self { max, attempt: Mutex::new(0), next }
    }

    pub fn max(&self) -> u64 {
        self.max
    }
}

impl<B: Backoff> Backoff for MaxRetries<B> {
    fn next(&self) -> Option<Duration> {
        // Held across the inner call so the count and the inner state advance together.
        let mut attempt = self.attempt.lock().unwrap_or_else(PoisonError::into_inner);
        if *attempt >= self.max {
            tracing::trace!(max = self.max, "max retries reached");
            return None;
        }
        *attempt += 1;
        self.next.next()
    }
}

/// Replaces zero or over-large delays with `cap`.
#[derive(Debug)]
pub struct CappedDuration<B> {
    cap: Duration,
    next: B,
}

impl<B: Backoff> CappedDuration<B> {
    pub fn new(cap: Duration, next: B) -> Self {
        Self { cap, next }
    }
}

impl<B: Backoff> Backoff for CappedDuration<B> {
    fn next(&self) -> Option<Duration> {
        let delay = self.next.next()?;
        if delay.is_zero() || delay > self.cap {
            return Some(self.cap);
        }
        Some(delay)
    }
}

/// Stops once `timeout` has elapsed since construction; clamps delays to what is left.
#[derive(Debug)]
pub struct MaxDuration<B, C = MonotonicClock> {
    timeout: Duration,
    start: Duration,
    clock: C,
    next: B,
}

impl<B: Backoff> MaxDuration<B, MonotonicClock> {
    pub fn new(timeout: Duration, next: B) -> Self {
        Self::with_clock(timeout, next, MonotonicClock::default())
    }
}

impl<B: Backoff, C: Clock> MaxDuration<B, C> {
    /// Use a custom clock; the budget starts at the clock's current reading.
    pub fn with_clock(timeout: Duration, next: B, clock: C) -> Self {
        let start = clock.now();
        Self { timeout, start, clock, next }
    }

    /// Budget left, or `None` once it is spent.
    pub fn remaining(&self) -> Option<Duration> {
        let elapsed = self.clock.now().saturating_sub(self.start);
        self.timeout.checked_sub(elapsed).filter(|left| !left.is_zero())
    }
}

impl<B: Backoff, C: Clock> Backoff for MaxDuration<B, C> {
    fn next(&self) -> Option<Duration> {
        let Some(remaining) = self.remaining() else {
            tracing::trace!(timeout = ?self.timeout, "max duration elapsed");
            return None;
        };
        let delay = self.next.next()?;
        if delay.is_zero() || delay > remaining {
            return Some(remaining);
        }
        Some(delay)
    }
}

/// Wraps a chain that can be restored to its initial state with [`reset`](Self::reset).
///
/// The chain is produced by `factory`; a reset swaps in a freshly built one. Calls to `next`
/// racing a reset land on either the old or the new chain, never on a torn state.
///
/// A reset reproduces the first delays only if the factory is deterministic. Jitter added with
/// [`with_jitter`](crate::BackoffExt::with_jitter) draws from a new OS-seeded source on every
/// build; construct a [`RandomSource::seeded`](crate::RandomSource::seeded) inside the factory
/// and pass it to [`with_jitter_from`](crate::BackoffExt::with_jitter_from) instead.
pub struct Resettable<B, F> {
    factory: F,
    current: ArcSwap<B>,
}

impl<B, F> Resettable<B, F>
where
    B: Backoff,
    F: Fn() -> Result<B, BackoffError> + Send + Sync,
{
    /// Build the initial chain. Fails if the factory does.
    pub fn new(factory: F) -> Result<Self, BackoffError> {
        let initial = factory()?;
        Ok(Self { factory, current: ArcSwap::from_pointee(initial) })
    }

    /// Replace the chain with a fresh one from the factory.
    pub fn reset(&self) -> Result<(), BackoffError> {
        let fresh = (self.factory)()?;
        self.current.store(Arc::new(fresh));
        Ok(())
    }
}

impl<B, F> Backoff for Resettable<B, F>
where
    B: Backoff,
    F: Fn() -> Result<B, BackoffError> + Send + Sync,
{
    fn next(&self) -> Option<Duration> {
        self.current.load().next()
    }
}

impl<B, F> fmt::Debug for Resettable<B, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resettable").field("factory", &"<factory>").finish_non_exhaustive()
    }
}
