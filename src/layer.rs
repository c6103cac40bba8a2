//! Tower-native retry layer.
//!
//! Wraps a service whose error type is [`AttemptError<E>`] and retries each request through the
//! [`Executor`]. Every request gets a fresh backoff chain from the layer's factory, so limits
//! such as [`MaxRetries`](crate::MaxRetries) apply per request. Requests must be `Clone`; the
//! inner service is cloned for every attempt.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use rebound::{retryable, AttemptError, BackoffExt, Constant, RetryLayer};
//! use tower_layer::Layer;
//!
//! let layer = RetryLayer::new(|| {
//!     Constant::new(Duration::from_millis(10)).unwrap().with_max_retries(3)
//! });
//! let _svc = layer.layer(tower::service_fn(|req: u32| async move {
//!     if req == 0 {
//!         Err(retryable("zero"))
//!     } else {
//!         Ok::<_, AttemptError<&str>>(req * 2)
//!     }
//! }));
//! ```

use crate::backoff::Backoff;
use crate::error::{AttemptError, RetryError};
use crate::retry::Executor;
use crate::sleeper::Sleeper;
use futures::future::{poll_fn, BoxFuture};
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use tower_layer::Layer;
use tower_service::Service;

/// Layer that retries requests with a backoff built per request.
pub struct RetryLayer<F> {
    factory: Arc<F>,
    executor: Executor,
    cancel: CancellationToken,
}

impl<F> RetryLayer<F> {
    /// `factory` builds the backoff chain used for one request.
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            executor: Executor::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.executor = self.executor.with_sleeper(sleeper);
        self
    }

    /// Abort in-progress and future retry loops when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

impl<F> Clone for RetryLayer<F> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            executor: self.executor.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<F> fmt::Debug for RetryLayer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryLayer")
            .field("factory", &"<factory>")
            .field("executor", &self.executor)
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl<S, F> Layer<S> for RetryLayer<F> {
    type Service = RetryService<S, F>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService { inner, layer: self.clone() }
    }
}

/// Retry service produced by [`RetryLayer`].
#[derive(Debug)]
pub struct RetryService<S, F> {
    inner: S,
    layer: RetryLayer<F>,
}

impl<S: Clone, F> Clone for RetryService<S, F> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), layer: self.layer.clone() }
    }
}

impl<S, F, B, E, Request> Service<Request> for RetryService<S, F>
where
    Request: Clone + Send + 'static,
    S: Service<Request, Error = AttemptError<E>> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
    E: Send + 'static,
    F: Fn() -> B + Send + Sync + 'static,
    B: Backoff + 'static,
{
    type Response = S::Response;
    type Error = RetryError<E>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(|err| RetryError::Failed(err.into_cause()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let backoff = (self.layer.factory)();
        let executor = self.layer.executor.clone();
        let cancel = self.layer.cancel.clone();
        // The instance readied by `poll_ready` may hold reserved capacity; it serves the first
        // attempt and `self.inner` is left unready for the caller's next `poll_ready`.
        let clone = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, clone);
        let template = ready.clone();
        let mut first = Some(ready);

        Box::pin(async move {
            executor
                .execute_value(&cancel, backoff, move |_attempt| {
                    let (mut svc, is_ready) = match first.take() {
                        Some(svc) => (svc, true),
                        None => (template.clone(), false),
                    };
                    let req = req.clone();
                    async move {
                        if !is_ready {
                            poll_fn(|cx| svc.poll_ready(cx)).await?;
                        }
                        svc.call(req).await
                    }
                })
                .await
        })
    }
}
