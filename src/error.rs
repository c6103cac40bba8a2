//! Error types for backoff construction and retry execution.
//!
//! Three layers of errors exist:
//! - [`BackoffError`]: a backoff or middleware was configured with an invalid parameter.
//!   Reported by constructors, never by [`Backoff::next`](crate::Backoff::next).
//! - [`AttemptError`]: what an operation returns on failure. Only the
//!   [`AttemptError::Retryable`] variant (built with [`retryable`]) drives another attempt.
//! - [`RetryError`]: what the executor hands back to its caller.
//!
//! Exhaustion is not a distinct error: when the backoff stops, the executor returns the
//! cause of the last retryable failure as [`RetryError::Failed`], exactly like a
//! non-retryable failure. Callers that need to tell "gave up" from "failed once" must
//! inspect the cause itself.

use std::fmt;

/// Errors returned while constructing a backoff or middleware.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackoffError {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: &'static str },
}

impl BackoffError {
    pub(crate) fn invalid(name: &'static str, reason: &'static str) -> Self {
        BackoffError::InvalidParameter { name, reason }
    }
}

/// Marks an error as eligible for retry.
///
/// The wrapper is transparent for error-chain inspection: `source()` yields the cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryableError<E> {
    cause: E,
}

impl<E> RetryableError<E> {
    pub fn new(cause: E) -> Self {
        Self { cause }
    }

    /// Borrow the wrapped cause.
    pub fn get_ref(&self) -> &E {
        &self.cause
    }

    /// Unwrap the cause.
    pub fn into_inner(self) -> E {
        self.cause
    }
}

impl<E: fmt::Display> fmt::Display for RetryableError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "retryable: {}", self.cause)
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryableError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// Mark `err` as retryable. Shorthand for `AttemptError::from(RetryableError::new(err))`.
pub fn retryable<E>(err: E) -> AttemptError<E> {
    AttemptError::Retryable(RetryableError::new(err))
}

/// Failure reported by a single attempt of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptError<E> {
    /// Returned to the caller as-is; no further attempts.
    Permanent(E),
    /// Consult the backoff and possibly try again.
    Retryable(RetryableError<E>),
}

impl<E> AttemptError<E> {
    /// Whether this failure was marked with [`retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, AttemptError::Retryable(_))
    }

    /// Strip the classification and return the underlying cause.
    pub fn into_cause(self) -> E {
        match self {
            AttemptError::Permanent(e) => e,
            AttemptError::Retryable(r) => r.into_inner(),
        }
    }

    /// Borrow the underlying cause.
    pub fn cause(&self) -> &E {
        match self {
            AttemptError::Permanent(e) => e,
            AttemptError::Retryable(r) => r.get_ref(),
        }
    }
}

impl<E> From<RetryableError<E>> for AttemptError<E> {
    fn from(err: RetryableError<E>) -> Self {
        AttemptError::Retryable(err)
    }
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Permanent(e) => write!(f, "{}", e),
            AttemptError::Retryable(r) => write!(f, "{}", r),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AttemptError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AttemptError::Permanent(e) => Some(e),
            AttemptError::Retryable(r) => Some(r),
        }
    }
}

/// Outcome of a retry loop that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation failed with a non-retryable error, or the backoff stopped after a
    /// retryable one. Holds the unwrapped cause in both cases.
    #[error("{0}")]
    Failed(E),
    /// The cancellation token fired before the loop could finish.
    #[error("retry cancelled")]
    Cancelled,
    /// A convenience wrapper could not construct its backoff.
    #[error("invalid backoff: {0}")]
    InvalidBackoff(#[source] BackoffError),
}

impl<E> RetryError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled)
    }

    /// Take the operation's error, if this is [`RetryError::Failed`].
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// Borrow the operation's error, if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            RetryError::Failed(e) => Some(e),
            _ => None,
        }
    }
}
