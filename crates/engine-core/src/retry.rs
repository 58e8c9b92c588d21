use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Indicates whether an error should be retried or treated as fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retry,
    /// Retryable, and the remote side told us how long to wait.
    RetryAfter(Duration),
    Stop,
}

/// What the caller should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    FailPermanent,
    FailTransientExhausted,
}

/// Result of running an operation under the retry policy.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was considered fatal and should bubble up immediately.
    Fatal { error: E, attempts: usize },
    /// The error was retryable, but the configured attempts were exhausted.
    AttemptsExceeded { error: E, attempts: usize },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Fatal { error, .. } | RetryError::AttemptsExceeded { error, .. } => error,
        }
    }

    pub fn attempts(&self) -> usize {
        match self {
            RetryError::Fatal { attempts, .. } | RetryError::AttemptsExceeded { attempts, .. } => {
                *attempts
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: if max_delay.is_zero() {
                base_delay
            } else {
                max_delay
            },
        }
    }

    /// No waiting between attempts. Handy for tests.
    pub fn immediate(max_attempts: usize) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Decides what happens after `attempt` (1-based) failed with `disposition`.
    ///
    /// A server hint is honoured even when it exceeds the computed backoff,
    /// but never capped below it.
    pub fn decide(&self, attempt: usize, disposition: RetryDisposition) -> RetryDecision {
        let hint = match disposition {
            RetryDisposition::Stop => return RetryDecision::FailPermanent,
            RetryDisposition::Retry => None,
            RetryDisposition::RetryAfter(hint) => Some(hint),
        };

        if attempt >= self.max_attempts {
            return RetryDecision::FailTransientExhausted;
        }

        let backoff = self.backoff_delay(attempt.saturating_sub(1));
        RetryDecision::RetryAfter(hint.map_or(backoff, |h| h.max(backoff)))
    }

    /// Executes the operation with the configured retry policy.
    pub async fn run<F, Fut, T, E, Classifier>(
        &self,
        mut op: F,
        classify: Classifier,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Classifier: Fn(&E) -> RetryDisposition,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(result) => return Ok(result),
                Err(error) => match self.decide(attempt, classify(&error)) {
                    RetryDecision::FailPermanent => {
                        return Err(RetryError::Fatal {
                            error,
                            attempts: attempt,
                        });
                    }
                    RetryDecision::FailTransientExhausted => {
                        return Err(RetryError::AttemptsExceeded {
                            error,
                            attempts: attempt,
                        });
                    }
                    RetryDecision::RetryAfter(delay) => {
                        debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying");
                        sleep(delay).await;
                    }
                },
            }
        }
    }

    fn backoff_delay(&self, attempt: usize) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::from_millis(0);
        }

        let factor = 1u128 << attempt.min(16);
        let base_ms = self.base_delay.as_millis();
        let delay_ms = base_ms.saturating_mul(factor);
        let capped = delay_ms.min(self.max_delay.as_millis());
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(1000))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(
            p.decide(1, RetryDisposition::Retry),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(
            p.decide(2, RetryDisposition::Retry),
            RetryDecision::RetryAfter(Duration::from_millis(200))
        );
        assert_eq!(
            p.decide(4, RetryDisposition::Retry),
            RetryDecision::RetryAfter(Duration::from_millis(800))
        );
        assert_eq!(
            p.decide(5, RetryDisposition::Retry),
            RetryDecision::FailTransientExhausted
        );
    }

    #[test]
    fn hint_wins_when_longer() {
        let p = policy();
        assert_eq!(
            p.decide(1, RetryDisposition::RetryAfter(Duration::from_secs(3))),
            RetryDecision::RetryAfter(Duration::from_secs(3))
        );
        assert_eq!(
            p.decide(3, RetryDisposition::RetryAfter(Duration::from_millis(10))),
            RetryDecision::RetryAfter(Duration::from_millis(400))
        );
    }

    #[test]
    fn stop_is_permanent_regardless_of_attempt() {
        assert_eq!(
            policy().decide(1, RetryDisposition::Stop),
            RetryDecision::FailPermanent
        );
    }

    #[tokio::test]
    async fn run_stops_on_fatal_without_retrying() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(5)
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("bad request") }
                },
                |_| RetryDisposition::Stop,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Fatal { attempts: 1, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_gives_up_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = RetryPolicy::immediate(3)
            .run(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("reset") }
                },
                |_| RetryDisposition::Retry,
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts(), 3);
        assert!(matches!(err, RetryError::AttemptsExceeded { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn run_returns_first_success() {
        let calls = AtomicUsize::new(0);
        let value = RetryPolicy::immediate(5)
            .run(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    async move { if n < 2 { Err("flaky") } else { Ok(n) } }
                },
                |_| RetryDisposition::Retry,
            )
            .await
            .unwrap();
        assert_eq!(value, 2);
    }
}
