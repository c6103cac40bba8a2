//! Jitter middleware to prevent thundering herds.
//!
//! - [`Jitter`]: perturbs each delay by an absolute amount, either `[0, j)` (add-only) or
//!   `[-j, j)`, clamped at zero.
//! - [`JitterPercent`]: scales each delay by `1 ± r/100` with `r` drawn below the configured
//!   percentage, clamped at zero.
//!
//! Notes:
//! - RNG: every middleware owns a [`RandomSource`]. By default each one is seeded from the OS;
//!   clone a source to share it deliberately, or seed it for reproducible tests.
//! - Stop signals from the wrapped backoff pass through untouched.
//!
//! Example:
//! ```rust
//! use rebound::{Backoff, BackoffExt, Constant};
//! use std::time::Duration;
//!
//! let backoff = Constant::new(Duration::from_secs(1))
//!     .unwrap()
//!     .with_jitter(Duration::from_millis(250), false);
//! let delay = backoff.next().unwrap();
//! assert!(delay >= Duration::from_millis(750) && delay <= Duration::from_millis(1250));
//! ```

use crate::backoff::{saturating_from_nanos, Backoff};
use crate::error::BackoffError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Uniform random source for jitter. Clones share one generator behind a mutex.
#[derive(Clone)]
pub struct RandomSource {
    rng: Arc<Mutex<StdRng>>,
}

impl RandomSource {
    /// Seed a fresh generator from the operating system.
    pub fn from_os_rng() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    /// Deterministic generator, for tests and reproducible schedules.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self { rng: Arc::new(Mutex::new(rng)) }
    }

    /// Uniform in `[0, bound)`; `0` when `bound` is zero.
    pub(crate) fn below(&self, bound: u128) -> u128 {
        if bound == 0 {
            return 0;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.random_range(0..bound)
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::from_os_rng()
    }
}

impl fmt::Debug for RandomSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandomSource").finish_non_exhaustive()
    }
}

/// Adds an absolute random offset to each delay.
#[derive(Debug)]
pub struct Jitter<B> {
    jitter: Duration,
    add_only: bool,
    rng: RandomSource,
    next: B,
}

impl<B: Backoff> Jitter<B> {
    pub fn new(jitter: Duration, add_only: bool, next: B) -> Self {
        Self::with_source(jitter, add_only, next, RandomSource::from_os_rng())
    }

    pub fn with_source(jitter: Duration, add_only: bool, next: B, rng: RandomSource) -> Self {
        Self { jitter, add_only, rng, next }
    }
}

impl<B: Backoff> Backoff for Jitter<B> {
    fn next(&self) -> Option<Duration> {
        let delay = self.next.next()?;
        let j = self.jitter.as_nanos();
        if j == 0 {
            return Some(delay);
        }

        let base = delay.as_nanos();
        let nanos = if self.add_only {
            base.saturating_add(self.rng.below(j))
        } else {
            // offset in [0, 2j) shifted down by j
            base.saturating_add(self.rng.below(j.saturating_mul(2))).saturating_sub(j)
        };
        Some(saturating_from_nanos(nanos))
    }
}

/// Scales each delay by a random percentage.
#[derive(Debug)]
pub struct JitterPercent<B> {
    percent: u64,
    add_only: bool,
    rng: RandomSource,
    next: B,
}

impl<B: Backoff> JitterPercent<B> {
    /// Returns an error if `percent > 100`.
    pub fn new(percent: u64, add_only: bool, next: B) -> Result<Self, BackoffError> {
        Self::with_source(percent, add_only, next, RandomSource::from_os_rng())
    }

    pub fn with_source(
        percent: u64,
        add_only: bool,
        next: B,
        rng: RandomSource,
    ) -> Result<Self, BackoffError> {
        if percent > 100 {
            return Err(BackoffError::invalid("percent", "must be between 0 and 100"));
        }
        Ok(Self { percent, add_only, rng, next })
    }
}

impl<B: Backoff> Backoff for JitterPercent<B> {
    fn next(&self) -> Option<Duration> {
        let delay = self.next.next()?;
        let p = u128::from(self.percent);
        if p == 0 {
            return Some(delay);
        }

        // factor is in hundredths: 100 + r for add-only, 100 + (r - p) otherwise; never negative
        let factor = if self.add_only {
            100 + self.rng.below(p)
        } else {
            100 + self.rng.below(p * 2) - p
        };
        Some(saturating_from_nanos(delay.as_nanos().saturating_mul(factor) / 100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{backoff_fn, BackoffFn, Constant};

    fn one_second() -> BackoffFn<impl Fn() -> Option<Duration> + Send + Sync> {
        backoff_fn(|| Some(Duration::from_secs(1)))
    }

    #[test]
    fn jitter_stays_within_symmetric_bounds() {
        let backoff = Jitter::new(Duration::from_millis(250), false, one_second());
        let mut varied = false;
        for _ in 0..10_000 {
            let delay = backoff.next().expect("never stops");
            assert!(delay >= Duration::from_millis(750), "{delay:?} below bound");
            assert!(delay <= Duration::from_millis(1250), "{delay:?} above bound");
            varied |= delay != Duration::from_secs(1);
        }
        assert!(varied, "jitter was never applied");
    }

    #[test]
    fn add_only_jitter_never_shrinks() {
        let backoff = Jitter::new(Duration::from_millis(100), true, one_second());
        for _ in 0..10_000 {
            let delay = backoff.next().unwrap();
            assert!(delay >= Duration::from_secs(1));
            assert!(delay < Duration::from_millis(1100));
        }
    }

    #[test]
    fn jitter_clamps_at_zero() {
        let backoff = Jitter::new(
            Duration::from_secs(10),
            false,
            backoff_fn(|| Some(Duration::from_millis(1))),
        );
        let mut clamped = 0;
        for _ in 0..1_000 {
            let delay = backoff.next().unwrap();
            assert!(delay <= Duration::from_millis(10_001));
            if delay.is_zero() {
                clamped += 1;
            }
        }
        assert!(clamped > 0, "no draw was clamped to zero");
    }

    #[test]
    fn zero_jitter_is_identity() {
        let backoff = Jitter::new(Duration::ZERO, false, one_second());
        assert_eq!(backoff.next(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn jitter_passes_stop_through() {
        let backoff = Jitter::new(Duration::from_secs(1), false, backoff_fn(|| None));
        assert_eq!(backoff.next(), None);
        let pct = JitterPercent::new(5, false, backoff_fn(|| None)).unwrap();
        assert_eq!(pct.next(), None);
    }

    #[test]
    fn jitter_percent_stays_within_bounds() {
        let backoff = JitterPercent::new(5, false, one_second()).unwrap();
        let mut varied = false;
        for _ in 0..10_000 {
            let delay = backoff.next().unwrap();
            assert!(delay >= Duration::from_millis(950), "{delay:?} below bound");
            assert!(delay <= Duration::from_millis(1050), "{delay:?} above bound");
            varied |= delay != Duration::from_secs(1);
        }
        assert!(varied, "jitter was never applied");
    }

    #[test]
    fn jitter_percent_add_only_never_shrinks() {
        let backoff = JitterPercent::new(20, true, one_second()).unwrap();
        for _ in 0..10_000 {
            let delay = backoff.next().unwrap();
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn jitter_percent_full_range_reaches_zero_floor() {
        let backoff = JitterPercent::new(100, false, one_second()).unwrap();
        for _ in 0..1_000 {
            assert!(backoff.next().unwrap() <= Duration::from_secs(2));
        }
    }

    #[test]
    fn jitter_percent_rejects_out_of_range() {
        let err = JitterPercent::new(101, false, one_second()).unwrap_err();
        assert!(matches!(err, BackoffError::InvalidParameter { name: "percent", .. }));
        assert!(JitterPercent::new(100, true, one_second()).is_ok());
        assert!(JitterPercent::new(0, true, one_second()).is_ok());
    }

    #[test]
    fn seeded_sources_are_reproducible() {
        let base = || Constant::new(Duration::from_secs(1)).unwrap();
        let jitter = Duration::from_millis(500);
        let a = Jitter::with_source(jitter, false, base(), RandomSource::seeded(7));
        let b = Jitter::with_source(jitter, false, base(), RandomSource::seeded(7));
        let first: Vec<_> = (0..32).map(|_| a.next()).collect();
        let second: Vec<_> = (0..32).map(|_| b.next()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn cloned_source_is_shared() {
        let shared = RandomSource::seeded(42);
        let reference = RandomSource::seeded(42);
        let clone = shared.clone();
        let drawn = [shared.below(1_000_000), clone.below(1_000_000)];
        let expected = [reference.below(1_000_000), reference.below(1_000_000)];
        assert_eq!(drawn, expected);
    }

    #[test]
    fn huge_delays_saturate_without_panicking() {
        let backoff = Jitter::new(Duration::from_secs(5), true, backoff_fn(|| Some(Duration::MAX)));
        assert_eq!(backoff.next(), Some(Duration::MAX));
    }
}
