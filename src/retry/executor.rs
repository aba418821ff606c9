//! Retry Executor
//!
//! Re-runs a fallible async operation with exponential backoff and jitter.

use log::{debug, warn};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::config::RetryConfiguration;

/// Why a retried operation gave up
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// The error returned by the last attempt
    pub error: E,
    /// How many attempts ran
    pub attempts: u32,
    /// True when every allowed attempt was used
    pub exhausted: bool,
}

impl<E> RetryFailure<E> {
    pub fn into_error(self) -> E {
        self.error
    }
}

type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Drives repeated execution of a unit of work per a `RetryConfiguration`
pub struct RetryExecutor<E> {
    config: RetryConfiguration,
    should_retry: RetryPredicate<E>,
    cancel: Option<CancellationToken>,
}

impl<E> Clone for RetryExecutor<E> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            should_retry: self.should_retry.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<E: Display + 'static> RetryExecutor<E> {
    /// Create an executor that retries every error
    pub fn new(config: RetryConfiguration) -> Self {
        Self {
            config,
            should_retry: Arc::new(|_: &E| true),
            cancel: None,
        }
    }

    /// Only retry errors accepted by `predicate`
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Stop retrying once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &RetryConfiguration {
        &self.config
    }

    /// Run `operation` until it succeeds or the policy gives up
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_detailed(operation).await.map_err(RetryFailure::into_error)
    }

    /// Like `run`, but reports how many attempts were made and whether they ran out
    pub async fn run_detailed<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.config.max_attempts();
        let mut attempt = 1;

        loop {
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Operation succeeded on attempt {}/{}", attempt, max_attempts);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if attempt >= max_attempts {
                warn!("Attempt {}/{} failed: {}. Giving up", attempt, max_attempts, err);
                return Err(RetryFailure {
                    error: err,
                    attempts: attempt,
                    exhausted: true,
                });
            }

            if !(self.should_retry)(&err) {
                debug!("Attempt {}/{} failed with a non-retryable error: {}", attempt, max_attempts, err);
                return Err(RetryFailure {
                    error: err,
                    attempts: attempt,
                    exhausted: false,
                });
            }

            let delay = self.config.delay_for_attempt(attempt);
            warn!(
                "Attempt {}/{} failed: {}. Retrying in {:?}",
                attempt, max_attempts, err, delay
            );

            match &self.cancel {
                Some(token) => {
                    tokio::select! {
                        _ = sleep(delay) => {}
                        _ = token.cancelled() => {
                            debug!("Retry cancelled after attempt {}", attempt);
                            return Err(RetryFailure {
                                error: err,
                                attempts: attempt,
                                exhausted: false,
                            });
                        }
                    }
                }
                None => sleep(delay).await,
            }

            attempt += 1;
        }
    }
}

/// Retry `operation` per `config`, retrying only errors accepted by `should_retry`
///
/// Returns the first success, or the error of the final attempt.
pub async fn retry<T, E, F, Fut, P>(
    config: &RetryConfiguration,
    should_retry: P,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool + Send + Sync + 'static,
    E: Display + 'static,
{
    RetryExecutor::new(config.clone())
        .with_predicate(should_retry)
        .run(operation)
        .await
}

/// Retry `operation` per `config`, treating every error as transient
pub async fn retry_always<T, E, F, Fut>(config: &RetryConfiguration, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display + 'static,
{
    RetryExecutor::new(config.clone()).run(operation).await
}
