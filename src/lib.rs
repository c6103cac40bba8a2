#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Rebound
//!
//! Retry and backoff primitives for async Rust: composable, stateful backoff chains and a
//! cancellation-aware retry loop.
//!
//! ## Features
//!
//! - **Base algorithms**: constant, exponential, and Fibonacci delays with overflow saturation
//! - **Middleware**: jitter (absolute or percent), max retries, capped delay, total time budget,
//!   and resettable chains
//! - **Executor** with explicit retryability: only errors marked with [`retryable`] are retried
//! - **Cooperative cancellation** through `tokio_util`'s `CancellationToken`
//! - **Tower layer** for retrying services
//!
//! ## Quick Start
//!
//! ```rust
//! use rebound::{retry, retryable, AttemptError, BackoffExt, Exponential};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backoff = Exponential::new(Duration::from_millis(100))
//!         .unwrap()
//!         .with_jitter_percent(10, false)
//!         .unwrap()
//!         .with_capped_duration(Duration::from_secs(2))
//!         .with_max_retries(3);
//!
//!     let token = CancellationToken::new();
//!     let result = retry(&token, backoff, |attempt| async move {
//!         // Your async operation here; mark transient failures as retryable.
//!         if attempt.retries() == 0 {
//!             let reset = std::io::Error::new(std::io::ErrorKind::Other, "connection reset");
//!             return Err(retryable(reset));
//!         }
//!         Ok::<_, AttemptError<std::io::Error>>(())
//!     })
//!     .await;
//!     assert!(result.is_ok());
//! }
//! ```

pub mod backoff;
pub mod clock;
pub mod error;
pub mod jitter;
pub mod layer;
pub mod middleware;
pub mod prelude;
pub mod retry;
pub mod sleeper;

// Re-exports
pub use backoff::{backoff_fn, Backoff, BackoffExt, BackoffFn, Constant, Exponential, Fibonacci};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{retryable, AttemptError, BackoffError, RetryError, RetryableError};
pub use jitter::{Jitter, JitterPercent, RandomSource};
pub use layer::{RetryLayer, RetryService};
pub use middleware::{CappedDuration, MaxDuration, MaxRetries, Resettable};
pub use retry::{
    repeat, retry, retry_constant, retry_exponential, retry_fibonacci, retry_value, Attempt,
    Executor,
};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
