use std::{future::Future, time::Duration};

use tokio::time::{Instant, sleep};

use crate::DynError;

#[derive(Debug, thiserror::Error)]
#[error("retry budget of {budget:?} exhausted after {attempts} attempts: {last}")]
/// Returned once an operation keeps failing for the whole elapsed-time
/// budget; carries the last observed error.
pub struct RetryError {
    pub attempts: usize,
    pub budget: Duration,
    #[source]
    pub last: DynError,
}

/// Exponential-backoff retry discipline for readiness probes and post-start
/// init commands.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    /// Production readiness waits: intervals growing from 500ms up to a 2s
    /// cap, within a five minute budget.
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(2),
            max_elapsed: Duration::from_secs(5 * 60),
        }
    }
}

impl RetryPolicy {
    /// A much shorter budget, suitable for tests that expect failure.
    #[must_use]
    pub fn short() -> Self {
        Self {
            max_elapsed: Duration::from_secs(15),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// Runs `op` until it succeeds or the elapsed-time budget runs out,
    /// sleeping an exponentially growing (capped) interval between attempts.
    pub async fn retry<F, Fut>(&self, mut op: F) -> Result<(), RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), DynError>>,
    {
        let started = Instant::now();
        let mut interval = self.initial_interval;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let last = match op().await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            if started.elapsed() + interval > self.max_elapsed {
                return Err(RetryError {
                    attempts,
                    budget: self.max_elapsed,
                    last,
                });
            }

            sleep(interval).await;
            interval = Duration::from_secs_f64(
                (interval.as_secs_f64() * self.multiplier)
                    .min(self.max_interval.as_secs_f64()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial_interval: Duration::from_millis(5),
            multiplier: 1.5,
            max_interval: Duration::from_millis(20),
            max_elapsed: Duration::from_millis(300),
        }
    }

    #[tokio::test]
    async fn succeeds_once_the_operation_does() {
        let calls = AtomicUsize::new(0);
        let result = fast_policy()
            .retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err("not yet".into())
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn returns_the_last_error_once_the_budget_is_spent() {
        let calls = AtomicUsize::new(0);
        let err = fast_policy()
            .retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), DynError>(format!("attempt {n}").into()) }
            })
            .await
            .unwrap_err();

        assert!(err.attempts > 1);
        assert_eq!(err.last.to_string(), format!("attempt {}", err.attempts - 1));
    }

    #[tokio::test]
    async fn an_immediately_successful_operation_runs_once() {
        let calls = AtomicUsize::new(0);
        fast_policy()
            .retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
