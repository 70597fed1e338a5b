//! Retry policies for background calls to the coordination service.
//!
//! A policy classifies each failure and schedules the next attempt. Interactive actions never
//! retry; only background sync goes through a policy.

use std::{future::Future, sync::Arc, time::Duration};

use tracing::{debug, warn};
use wallet_primitives::SyncRetryConfig;
use wallet_service_proto::ServiceError;

/// Type alias for the error classifier to reduce type complexity.
pub type ErrorHandler<E> = Arc<dyn Fn(&E, usize) -> RetryAction + Send + Sync>;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RetryAction {
    /// Try again after the delay.
    Retry(Duration),

    /// Give up and return the error.
    Stop,
}

/// Decides whether and when a failed call is attempted again.
#[derive(Clone)]
pub struct RetryPolicy<E> {
    error_handler: ErrorHandler<E>,

    /// Total attempts including the first one. `None` for unlimited.
    max_attempts: Option<usize>,
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl<E> RetryPolicy<E> {
    /// A policy driven by `error_handler`, which sees the error and the zero-based retry number.
    pub fn new<F>(error_handler: F) -> Self
    where
        F: Fn(&E, usize) -> RetryAction + Send + Sync + 'static,
    {
        Self {
            error_handler: Arc::new(error_handler),
            max_attempts: None,
        }
    }

    /// Caps the total number of attempts.
    pub const fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Retries every error, waiting `initial_delay * multiplier^n` before retry `n`.
    pub fn exponential_backoff(initial_delay: Duration, multiplier: f64) -> Self
    where
        E: 'static,
    {
        Self::new(move |_error, retry| {
            let delay_ms = initial_delay.as_millis() as f64 * multiplier.powi(retry as i32);
            RetryAction::Retry(Duration::from_millis(delay_ms as u64))
        })
    }

    /// Never retries.
    pub fn no_retry() -> Self
    where
        E: 'static,
    {
        Self::new(|_error, _retry| RetryAction::Stop)
    }

    /// Restricts retries to errors matching `predicate`.
    pub fn only_if<P>(self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
        E: 'static,
    {
        let handler = self.error_handler;
        Self {
            error_handler: Arc::new(move |error, retry| {
                if predicate(error) {
                    handler(error, retry)
                } else {
                    RetryAction::Stop
                }
            }),
            max_attempts: self.max_attempts,
        }
    }

    /// Runs `generator` until it succeeds or the policy gives up.
    pub async fn retry<A, Fut, Gen>(&self, mut generator: Gen) -> Result<A, E>
    where
        Fut: Future<Output = Result<A, E>>,
        Gen: FnMut() -> Fut,
        E: std::fmt::Display,
    {
        let mut retry = 0;

        loop {
            let error = match generator().await {
                Ok(result) => return Ok(result),
                Err(error) => error,
            };

            if self
                .max_attempts
                .is_some_and(|max_attempts| retry + 1 >= max_attempts)
            {
                warn!(attempts = retry + 1, %error, "giving up after last attempt");
                return Err(error);
            }

            match (self.error_handler)(&error, retry) {
                RetryAction::Retry(delay) => {
                    debug!(retry, ?delay, %error, "retrying");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                RetryAction::Stop => return Err(error),
            }
        }
    }
}

impl RetryPolicy<ServiceError> {
    /// The background sync policy: exponential backoff over transient errors only.
    pub fn from_config(config: &SyncRetryConfig) -> Self {
        Self::exponential_backoff(config.initial_delay(), config.multiplier)
            .only_if(ServiceError::is_transient)
            .with_max_attempts(config.max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn fast_config() -> SyncRetryConfig {
        SyncRetryConfig {
            initial_delay_ms: 1,
            multiplier: 2.0,
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn recovers_from_transient_failures() {
        let counter = &AtomicUsize::new(0);
        let policy = RetryPolicy::from_config(&fast_config());

        let result = policy
            .retry(move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ServiceError::Timeout)
                } else {
                    Ok("synced")
                }
            })
            .await;

        assert_eq!(result, Ok("synced"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_at_max_attempts() {
        let counter = &AtomicUsize::new(0);
        let policy = RetryPolicy::from_config(&fast_config());

        let result: Result<(), _> = policy
            .retry(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Internet("offline".into()))
            })
            .await;

        assert_eq!(result, Err(ServiceError::Internet("offline".into())));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let counter = &AtomicUsize::new(0);
        let policy = RetryPolicy::from_config(&fast_config());

        let result: Result<(), _> = policy
            .retry(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Codable("bad payload".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backoff_grows_between_attempts() {
        let policy =
            RetryPolicy::<ServiceError>::exponential_backoff(Duration::from_millis(2), 2.0)
                .with_max_attempts(3);

        let start = std::time::Instant::now();
        let result: Result<(), _> = policy
            .retry(move || async move { Err(ServiceError::Timeout) })
            .await;

        assert!(result.is_err());
        // 2ms before the second attempt, 4ms before the third
        assert!(start.elapsed() >= Duration::from_millis(6));
    }

    #[tokio::test]
    async fn no_retry_runs_once() {
        let counter = &AtomicUsize::new(0);
        let result: Result<(), _> = RetryPolicy::no_retry()
            .retry(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ServiceError::Timeout)
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
