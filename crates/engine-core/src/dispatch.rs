use crate::{
    metrics::Metrics,
    retry::{RetryDecision, RetryDisposition, RetryPolicy},
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::{fmt, future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    sync::Semaphore,
    time::{error::Elapsed, sleep, timeout},
};
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub max_concurrent: usize,
    /// Minimum gap between the starts of two calls, process-wide.
    pub min_spacing: Duration,
    /// Hard wall-clock ceiling for one attempt.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            max_concurrent: 4,
            min_spacing: Duration::from_millis(250),
            call_timeout: Duration::from_secs(180),
            retry: RetryPolicy::default(),
        }
    }
}

/// Identifies one scheduled call in logs.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub id: String,
    pub context: String,
}

impl CallContext {
    pub fn new(id: impl Into<String>, context: impl Into<String>) -> Self {
        CallContext {
            id: id.into(),
            context: context.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError<E> {
    #[error("{context} failed permanently after {attempts} attempt(s): {error}")]
    Permanent {
        error: E,
        attempts: usize,
        context: String,
    },

    #[error("{context} still failing after {attempts} attempt(s): {error}")]
    Exhausted {
        error: E,
        attempts: usize,
        context: String,
    },
}

impl<E> DispatchError<E> {
    pub fn attempts(&self) -> usize {
        match self {
            DispatchError::Permanent { attempts, .. }
            | DispatchError::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn remote_error(&self) -> &E {
        match self {
            DispatchError::Permanent { error, .. }
            | DispatchError::Exhausted { error, .. } => error,
        }
    }
}

/// Shared throttle in front of every outbound catalog call.
///
/// Holds a concurrency slot only while an attempt is in flight; backoff sleeps
/// happen with the slot released so other callers keep moving.
pub struct Dispatcher {
    slots: Arc<Semaphore>,
    limiter: Option<DefaultDirectRateLimiter>,
    retry: RetryPolicy,
    call_timeout: Duration,
    metrics: Metrics,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, metrics: Metrics) -> Self {
        let limiter = Quota::with_period(config.min_spacing).map(RateLimiter::direct);
        Dispatcher {
            slots: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            limiter,
            retry: config.retry,
            call_timeout: config.call_timeout,
            metrics,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Runs `task` until it succeeds, `classify` calls the error permanent, or
    /// the attempt ceiling is reached.
    pub async fn schedule<T, E, F, Fut, C>(
        &self,
        ctx: &CallContext,
        mut task: F,
        classify: C,
    ) -> Result<T, DispatchError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<Elapsed> + fmt::Display,
        C: Fn(&E) -> RetryDisposition,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = {
                // `slots` is never closed, so acquiring only waits.
                let _permit = self.slots.acquire().await.ok();
                if let Some(limiter) = &self.limiter {
                    limiter.until_ready().await;
                }
                self.metrics.increment_remote_calls(1);
                debug!(call_id = %ctx.id, context = %ctx.context, attempt, "Dispatching call");

                match timeout(self.call_timeout, task()).await {
                    Ok(result) => result,
                    Err(elapsed) => Err(E::from(elapsed)),
                }
            };

            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match self.retry.decide(attempt, classify(&err)) {
                RetryDecision::RetryAfter(delay) => {
                    self.metrics.increment_retries(1);
                    warn!(
                        call_id = %ctx.id,
                        context = %ctx.context,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retryable remote failure"
                    );
                    sleep(delay).await;
                }
                RetryDecision::FailPermanent => {
                    self.metrics.increment_permanent_failures(1);
                    error!(
                        call_id = %ctx.id,
                        context = %ctx.context,
                        attempt,
                        error = %err,
                        "Remote call rejected"
                    );
                    return Err(DispatchError::Permanent {
                        error: err,
                        attempts: attempt,
                        context: ctx.context.clone(),
                    });
                }
                RetryDecision::FailTransientExhausted => {
                    self.metrics.increment_permanent_failures(1);
                    error!(
                        call_id = %ctx.id,
                        context = %ctx.context,
                        attempt,
                        error = %err,
                        "Retry budget exhausted"
                    );
                    return Err(DispatchError::Exhausted {
                        error: err,
                        attempts: attempt,
                        context: ctx.context.clone(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;
    use tracing_test::traced_test;

    #[derive(Debug)]
    enum TestError {
        Status(u16),
        Throttled(Duration),
        Timeout,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl From<Elapsed> for TestError {
        fn from(_: Elapsed) -> Self {
            TestError::Timeout
        }
    }

    fn classify(err: &TestError) -> RetryDisposition {
        match err {
            TestError::Status(500..=599) | TestError::Timeout => RetryDisposition::Retry,
            TestError::Throttled(hint) => RetryDisposition::RetryAfter(*hint),
            TestError::Status(_) => RetryDisposition::Stop,
        }
    }

    fn dispatcher(max_concurrent: usize, min_spacing: Duration) -> Dispatcher {
        Dispatcher::new(
            DispatcherConfig {
                max_concurrent,
                min_spacing,
                call_timeout: Duration::from_secs(5),
                retry: RetryPolicy::immediate(5),
            },
            Metrics::new(),
        )
    }

    #[tokio::test]
    async fn never_exceeds_max_concurrent() {
        let d = dispatcher(2, Duration::ZERO);
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let calls = (0..8).map(|i| {
            let ctx = CallContext::new(format!("call-{i}"), "test");
            let (in_flight, peak, d) = (&in_flight, &peak, &d);
            async move {
                d.schedule(
                    &ctx,
                    move || async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(20)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, TestError>(())
                    },
                    classify,
                )
                .await
            }
        });

        let results = join_all(calls).await;
        assert!(results.iter().all(Result::is_ok));
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn not_found_is_attempted_once() {
        let d = dispatcher(1, Duration::ZERO);
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = d
            .schedule(
                &CallContext::new("x", "fetch"),
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Status(404)) }
                },
                classify,
            )
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, DispatchError::Permanent { attempts: 1, .. }));
        assert!(matches!(err.remote_error(), TestError::Status(404)));
        assert_eq!(err.attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[traced_test]
    #[tokio::test]
    async fn server_errors_retry_up_to_ceiling() {
        let d = dispatcher(1, Duration::ZERO);
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = d
            .schedule(
                &CallContext::new("x", "bulk write"),
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(TestError::Status(503)) }
                },
                classify,
            )
            .await;

        assert!(matches!(result, Err(DispatchError::Exhausted { attempts: 5, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(d.metrics.snapshot().retries, 4);
        assert!(logs_contain("Retry budget exhausted"));
    }

    #[tokio::test]
    async fn honours_retry_after_hint() {
        let d = dispatcher(1, Duration::ZERO);
        let calls = AtomicUsize::new(0);
        let started = Instant::now();

        let value = d
            .schedule(
                &CallContext::new("x", "search"),
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(TestError::Throttled(Duration::from_millis(60)))
                        } else {
                            Ok(n)
                        }
                    }
                },
                classify,
            )
            .await
            .unwrap();

        assert_eq!(value, 1);
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn slow_calls_time_out_and_count_as_transient() {
        let d = Dispatcher::new(
            DispatcherConfig {
                max_concurrent: 1,
                min_spacing: Duration::ZERO,
                call_timeout: Duration::from_millis(20),
                retry: RetryPolicy::immediate(2),
            },
            Metrics::new(),
        );

        let result: Result<(), _> = d
            .schedule(
                &CallContext::new("x", "fetch"),
                || async {
                    sleep(Duration::from_secs(5)).await;
                    Ok(())
                },
                classify,
            )
            .await;

        match result {
            Err(DispatchError::Exhausted {
                error: TestError::Timeout,
                attempts,
                ..
            }) => assert_eq!(attempts, 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn spacing_delays_consecutive_calls() {
        let d = dispatcher(4, Duration::from_millis(40));
        let started = Instant::now();
        for i in 0..3 {
            d.schedule(
                &CallContext::new(format!("c{i}"), "spacing"),
                || async { Ok::<_, TestError>(()) },
                classify,
            )
            .await
            .unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(80));
    }
}
