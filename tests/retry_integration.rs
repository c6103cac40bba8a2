use futures::future::join_all;
use rebound::{
    retry, retryable, AttemptError, Backoff, BackoffExt, Constant, Executor, Exponential,
    Fibonacci, InstantSleeper, ManualClock, MaxDuration, RandomSource, Resettable, RetryError,
    TrackingSleeper,
};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

#[derive(Debug, Clone, PartialEq, Eq)]
struct TestError(String);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TestError: {}", self.0)
    }
}

impl std::error::Error for TestError {}

fn oops() -> AttemptError<TestError> {
    retryable(TestError("oops".into()))
}

#[tokio::test]
async fn full_chain_respects_cap_jitter_and_limit() {
    let sleeper = TrackingSleeper::new();
    let backoff = Exponential::new(Duration::from_millis(100))
        .unwrap()
        .with_jitter_from(Duration::from_millis(20), false, RandomSource::seeded(3))
        .with_capped_duration(Duration::from_millis(300))
        .with_max_retries(5);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let token = CancellationToken::new();
    let result = Executor::new()
        .with_sleeper(sleeper.clone())
        .execute(&token, backoff, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(oops()) }
        })
        .await;

    assert_eq!(result, Err(RetryError::Failed(TestError("oops".into()))));
    assert_eq!(calls.load(Ordering::SeqCst), 6);

    let delays = sleeper.calls();
    assert_eq!(delays.len(), 5);
    assert!(delays[0] >= Duration::from_millis(80) && delays[0] <= Duration::from_millis(120));
    assert!(delays[1] >= Duration::from_millis(180) && delays[1] <= Duration::from_millis(220));
    for delay in &delays[2..] {
        assert!(*delay <= Duration::from_millis(300), "{delay:?} exceeds cap");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pre_cancelled_token_runs_operation_at_most_once() {
    for _ in 0..10_000 {
        let token = CancellationToken::new();
        let backoff = Constant::new(Duration::from_millis(1))
            .unwrap()
            .with_max_retries(5)
            .with_jitter(Duration::from_millis(5), false);

        token.cancel();
        let mut calls = 0;
        let result = retry(&token, backoff, |_| {
            calls += 1;
            async { Err(oops()) }
        })
        .await;

        assert!(calls <= 1, "operation ran {calls} times");
        assert_eq!(result, Err(RetryError::Cancelled));
    }
}

#[tokio::test]
async fn concurrent_executors_share_one_fibonacci_sequence() {
    let backoff = Arc::new(Fibonacci::new(Duration::from_nanos(1)).unwrap());
    let sleeper = TrackingSleeper::new();
    let executor = Executor::new().with_sleeper(sleeper.clone());
    let token = CancellationToken::new();

    let runs = (0..4).map(|_| {
        let backoff = backoff.clone();
        let executor = executor.clone();
        let token = token.clone();
        async move {
            executor
                .execute(&token, backoff, |attempt| async move {
                    tokio::task::yield_now().await;
                    if attempt.retries() < 3 {
                        Err(oops())
                    } else {
                        Ok(())
                    }
                })
                .await
        }
    });
    for result in join_all(runs).await {
        assert!(result.is_ok());
    }

    let mut delays: Vec<u128> = sleeper.calls().iter().map(Duration::as_nanos).collect();
    delays.sort_unstable();
    assert_eq!(delays, vec![1, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89, 144]);
}

#[tokio::test]
async fn max_duration_budget_ends_the_loop() {
    let clock = ManualClock::new();
    let backoff = MaxDuration::with_clock(
        Duration::from_secs(1),
        Constant::new(Duration::from_millis(400)).unwrap(),
        clock.clone(),
    );
    let sleeper = TrackingSleeper::new();
    let token = CancellationToken::new();

    let result = Executor::new()
        .with_sleeper(sleeper.clone())
        .execute(&token, backoff, |_| {
            clock.advance(Duration::from_millis(400));
            async { Err(oops()) }
        })
        .await;

    assert!(matches!(result, Err(RetryError::Failed(_))));
    // 400ms elapsed leaves 600ms, 800ms leaves 200ms, 1200ms stops.
    assert_eq!(sleeper.calls(), vec![Duration::from_millis(400), Duration::from_millis(200)]);
}

#[tokio::test]
async fn reset_chain_can_be_reused_across_executions() {
    let backoff =
        Resettable::new(|| Ok(Fibonacci::new(Duration::from_millis(5))?.with_max_retries(2)))
            .unwrap();
    let executor = Executor::new().with_sleeper(InstantSleeper);
    let token = CancellationToken::new();

    for _ in 0..3 {
        let mut calls = 0;
        let result = executor
            .execute(&token, &backoff, |_| {
                calls += 1;
                async { Err(oops()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 3);
        assert_eq!(backoff.next(), None, "budget spent");
        backoff.reset().unwrap();
    }
}

#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn exhaustion_and_cancellation_are_logged() {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer = SharedWriter(buffer.clone());
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BoxMakeWriter::new(move || writer.clone()))
        .with_max_level(tracing::Level::DEBUG)
        .without_time()
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let token = CancellationToken::new();
    let executor = Executor::new().with_sleeper(InstantSleeper);
    let backoff = Constant::new(Duration::from_millis(1)).unwrap().with_max_retries(1);
    let _ = executor.execute(&token, backoff, |_| async { Err(oops()) }).await;

    token.cancel();
    let _ = executor
        .execute(&token, Constant::new(Duration::from_millis(1)).unwrap(), |_| async {
            Err(oops())
        })
        .await;

    let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert!(logs.contains("backoff stopped"), "missing exhaustion event: {logs}");
    assert!(logs.contains("retry cancelled before attempt"), "missing cancel event: {logs}");
}
