//! Bounded retry with a jittered delay before every attempt
//!
//! Semantics:
//! - `max_retries(n)` is mandatory and counts retries, so an always-failing operation runs
//!   exactly `n + 1` times. Unlimited retries can stall a caller forever, so there is no
//!   default bound and `n` is capped at [`MAX_RETRY_BOUND`].
//! - A delay drawn from the configured [`Jitter`] is awaited before *each* attempt,
//!   including the first.
//! - The `should_retry` predicate decides whether a failure is worth another attempt; a
//!   rejected failure is returned immediately as [`RetryError::Inner`].
//! - Once the budget is spent the caller gets [`RetryError::RetryExhausted`] with the most
//!   recent failures attached.
//!
//! Retries re-issue the request. Only wrap operations that are safe to repeat: a request
//! that reached the server before failing on the way back will have its effects applied
//! again.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use switchyard::{InstantSleeper, Jitter, RetryError, RetryPolicy};
//!
//! #[derive(Debug)]
//! struct MyErr;
//! impl std::fmt::Display for MyErr { fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "oops") } }
//! impl std::error::Error for MyErr {}
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::<MyErr>::builder()
//!     .max_retries(2)
//!     .with_jitter(Jitter::uniform(Duration::from_millis(1), Duration::from_millis(200)).unwrap())
//!     .with_sleeper(InstantSleeper)
//!     .build()
//!     .unwrap();
//! let result: Result<(), RetryError<MyErr>> = policy.execute(|| async { Err(MyErr) }).await;
//! assert_eq!(result.unwrap_err().attempts(), Some(3));
//! # });
//! ```

use crate::error::MAX_RETRY_FAILURES;
use crate::telemetry::{PipelineEvent, RetryEvent, Telemetry};
use crate::{Jitter, RetryError, Sleeper, TokioSleeper};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;

/// Largest retry bound a policy accepts.
pub const MAX_RETRY_BOUND: usize = 100;

/// Retry policy combining a retry bound, jitter, predicate, and sleeper.
pub struct RetryPolicy<E> {
    max_retries: usize,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
    telemetry: Telemetry,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_retries: self.max_retries,
            jitter: self.jitter,
            should_retry: self.should_retry.clone(),
            sleeper: self.sleeper.clone(),
            telemetry: self.telemetry.clone(),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("jitter", &self.jitter)
            .field("sleeper", &self.sleeper)
            .field("should_retry", &"<predicate>")
            .finish()
    }
}

impl<E> RetryPolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Construct a new builder. `max_retries` must be set before `build`.
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Total attempts an always-failing operation receives.
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    pub fn jitter(&self) -> Jitter {
        self.jitter
    }

    /// Execute an async operation with retry semantics.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, RetryError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let started = Instant::now();
        let max_attempts = self.max_attempts();
        let mut failures: VecDeque<E> = VecDeque::new();

        for attempt in 1..=max_attempts {
            let delay = self.jitter.sample();
            self.telemetry.emit(PipelineEvent::Retry(RetryEvent::Attempt { attempt, delay })).await;
            self.sleeper.sleep(delay).await;

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "operation succeeded after retry");
                    }
                    self.telemetry
                        .emit(PipelineEvent::Retry(RetryEvent::Succeeded { attempts: attempt }))
                        .await;
                    return Ok(value);
                }
                Err(e) => {
                    if !(self.should_retry)(&e) {
                        tracing::debug!(attempt, error = %e, "failure is not retryable");
                        return Err(RetryError::Inner(e));
                    }
                    tracing::debug!(attempt, max_attempts, error = %e, "attempt failed");

                    failures.push_back(e);
                    while failures.len() > MAX_RETRY_FAILURES {
                        failures.pop_front();
                    }
                }
            }
        }

        let total_duration = started.elapsed();
        tracing::warn!(attempts = max_attempts, ?total_duration, "retry budget exhausted");
        self.telemetry
            .emit(PipelineEvent::Retry(RetryEvent::Exhausted {
                total_attempts: max_attempts,
                total_duration,
            }))
            .await;
        Err(RetryError::retry_exhausted(max_attempts, failures.into_iter().collect()))
    }
}

/// Builder for `RetryPolicy`.
pub struct RetryPolicyBuilder<E> {
    max_retries: Option<usize>,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
    telemetry: Telemetry,
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// No retry bound was supplied.
    #[error("a retry bound is required; call max_retries(n)")]
    MissingRetryBound,
    /// The bound exceeds `MAX_RETRY_BOUND`.
    #[error("max_retries must be <= {max} (got {provided})")]
    RetryBoundTooLarge { provided: usize, max: usize },
}

impl<E> RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            max_retries: None,
            jitter: Jitter::None,
            should_retry: Arc::new(|_| true),
            sleeper: Arc::new(TokioSleeper),
            telemetry: Telemetry::null(),
        }
    }

    /// Set the number of retries after the initial attempt.
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set the delay drawn before every attempt.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Predicate deciding whether a failure is retryable.
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Build the retry policy, validating inputs.
    pub fn build(self) -> Result<RetryPolicy<E>, BuildError> {
        let max_retries = self.max_retries.ok_or(BuildError::MissingRetryBound)?;
        if max_retries > MAX_RETRY_BOUND {
            return Err(BuildError::RetryBoundTooLarge {
                provided: max_retries,
                max: MAX_RETRY_BOUND,
            });
        }
        Ok(RetryPolicy {
            max_retries,
            jitter: self.jitter,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
            telemetry: self.telemetry,
        })
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Tower-native retry layer.
#[derive(Debug)]
pub struct RetryLayer<E> {
    policy: RetryPolicy<E>,
}

impl<E> Clone for RetryLayer<E> {
    fn clone(&self) -> Self {
        Self { policy: self.policy.clone() }
    }
}

impl<E> RetryLayer<E> {
    pub fn new(policy: RetryPolicy<E>) -> Self {
        Self { policy }
    }
}

impl<S, E> Layer<S> for RetryLayer<E> {
    type Service = RetryService<S, E>;

    fn layer(&self, service: S) -> Self::Service {
        RetryService { inner: service, policy: self.policy.clone() }
    }
}

/// Retry service produced by `RetryLayer`.
///
/// Each attempt drives a fresh clone of the inner service to readiness, so this service
/// itself is always ready.
#[derive(Debug)]
pub struct RetryService<S, E> {
    inner: S,
    policy: RetryPolicy<E>,
}

impl<S: Clone, E> Clone for RetryService<S, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), policy: self.policy.clone() }
    }
}

impl<S, Request> Service<Request> for RetryService<S, S::Error>
where
    Request: Clone + Send + 'static,
    S: Service<Request> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: std::error::Error + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = RetryError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let policy = self.policy.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            policy.execute(move || inner.clone().oneshot(req.clone())).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MemorySink;
    use crate::{InstantSleeper, TrackingSleeper};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    fn instant_policy(max_retries: usize) -> RetryPolicy<TestError> {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .with_sleeper(InstantSleeper)
            .build()
            .expect("builder")
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let policy = instant_policy(3);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result = policy
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "Should only execute once");
    }

    #[tokio::test]
    async fn exhaustion_records_failures_in_order() {
        let policy = instant_policy(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result = policy
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError(format!("attempt {}", attempt)))
                }
            })
            .await;

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            RetryError::RetryExhausted { attempts, failures } => {
                assert_eq!(attempts, 3);
                let messages: Vec<_> = failures.iter().map(|f| f.0.as_str()).collect();
                assert_eq!(messages, ["attempt 0", "attempt 1", "attempt 2"]);
            }
            e => panic!("Expected RetryExhausted, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let sleeper = TrackingSleeper::new();
        let policy = RetryPolicy::builder()
            .max_retries(0)
            .with_sleeper(sleeper.clone())
            .build()
            .expect("builder");

        let result = policy.execute(|| async { Err::<(), _>(TestError("nope".into())) }).await;

        assert_eq!(result.unwrap_err().attempts(), Some(1));
        assert_eq!(sleeper.calls(), 1, "the single attempt is still preceded by its delay");
    }

    #[tokio::test]
    async fn jittered_delay_precedes_every_attempt() {
        let sleeper = TrackingSleeper::new();
        let jitter = Jitter::uniform(Duration::from_millis(1), Duration::from_millis(200)).unwrap();
        let policy = RetryPolicy::builder()
            .max_retries(4)
            .with_jitter(jitter)
            .with_sleeper(sleeper.clone())
            .build()
            .expect("builder");

        let _ = policy.execute(|| async { Err::<(), _>(TestError("down".into())) }).await;

        assert_eq!(sleeper.calls(), 5, "one delay per attempt");
        for delay in sleeper.durations() {
            assert!(delay >= Duration::from_millis(1) && delay <= Duration::from_millis(200));
        }
    }

    #[tokio::test]
    async fn predicate_short_circuits_fatal_errors() {
        let policy = RetryPolicy::builder()
            .max_retries(5)
            .with_sleeper(InstantSleeper)
            .should_retry(|e: &TestError| e.0.contains("retryable"))
            .build()
            .expect("builder");

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let result = policy
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError("fatal error".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Inner(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1, "Should not retry non-retryable error");

        counter.store(0, Ordering::SeqCst);
        let result = policy
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    let attempt = counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err(TestError("retryable error".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn emits_attempt_and_outcome_events() {
        let sink = MemorySink::new();
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .with_jitter(Jitter::fixed(Duration::from_millis(5)))
            .with_sleeper(InstantSleeper)
            .with_telemetry(Telemetry::new(sink.clone()))
            .build()
            .expect("builder");

        let counter = Arc::new(AtomicUsize::new(0));
        let result = policy
            .execute(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TestError("first".into()))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(result.is_ok());

        assert_eq!(
            sink.events(),
            vec![
                PipelineEvent::Retry(RetryEvent::Attempt {
                    attempt: 1,
                    delay: Duration::from_millis(5)
                }),
                PipelineEvent::Retry(RetryEvent::Attempt {
                    attempt: 2,
                    delay: Duration::from_millis(5)
                }),
                PipelineEvent::Retry(RetryEvent::Succeeded { attempts: 2 }),
            ]
        );
    }

    #[test]
    fn builder_requires_a_bound() {
        let err = RetryPolicy::<TestError>::builder().build().unwrap_err();
        assert_eq!(err, BuildError::MissingRetryBound);
    }

    #[test]
    fn builder_rejects_excessive_bound() {
        let err = RetryPolicy::<TestError>::builder().max_retries(MAX_RETRY_BOUND + 1).build();
        assert!(matches!(err, Err(BuildError::RetryBoundTooLarge { .. })));
    }

    #[tokio::test]
    async fn layer_retries_inner_service() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let svc = tower::service_fn(move |req: u32| {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError("flaky".into()))
                } else {
                    Ok(req * 2)
                }
            }
        });

        let retrying = RetryLayer::new(instant_policy(3)).layer(svc);
        let response = retrying.oneshot(21).await.expect("third attempt succeeds");

        assert_eq!(response, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
