//! Exponential backoff with jitter for retry loops.

use std::ops::ControlFlow;
use std::time::Duration;

use rand::prelude::*;
use tracing::info;

/// Exponential backoff with jitter.
///
/// See <https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/>
#[derive(Debug, Clone)]
#[allow(missing_copy_implementations)]
pub struct BackoffConfig {
    /// Initial backoff.
    pub init_backoff: Duration,

    /// Maximum backoff.
    pub max_backoff: Duration,

    /// Multiplier for each backoff round.
    pub base: f64,

    /// Timeout until we try to retry a request, i.e. after this timeout a
    /// retry loop will give up and surface the last error.
    pub deadline: Option<Duration>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(15),
            base: 3.0,
            deadline: None,
        }
    }
}

/// Error that is returned by [`Backoff::retry_with_backoff`] when the
/// deadline expired before an attempt succeeded or failed fatally.
#[derive(Debug, thiserror::Error)]
#[error("Retry exceeded deadline ({deadline:?}). Source: {source}")]
pub struct BackoffError<E>
where
    E: std::error::Error + Send,
{
    deadline: Duration,

    source: E,
}

impl<E> BackoffError<E>
where
    E: std::error::Error + Send,
{
    /// The last error the retried operation produced.
    pub fn into_inner(self) -> E {
        self.source
    }
}

/// Backoff result.
pub type BackoffResult<T, E> = Result<T, BackoffError<E>>;

/// [`Backoff`] can be created from a [`BackoffConfig`].
///
/// Consecutive calls to [`Backoff::next`] will return the next backoff
/// interval.
#[derive(Debug)]
pub struct Backoff {
    init_backoff: f64,
    next_backoff_secs: f64,
    max_backoff_secs: f64,
    base: f64,
    total: f64,
    deadline: Option<f64>,
    rng: SmallRng,
}

impl Backoff {
    /// Create a new [`Backoff`] from the provided [`BackoffConfig`].
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            init_backoff: config.init_backoff.as_secs_f64(),
            next_backoff_secs: config.init_backoff.as_secs_f64(),
            max_backoff_secs: config.max_backoff.as_secs_f64(),
            base: config.base,
            total: 0.0,
            deadline: config.deadline.map(|d| d.as_secs_f64()),
            rng: SmallRng::from_entropy(),
        }
    }

    /// Fade the next backoff interval out of the configured range.
    pub fn next(&mut self) -> Duration {
        let range = self.init_backoff..(self.next_backoff_secs * self.base);

        let rand_backoff = self.rng.gen_range(range);
        let next_backoff = self.max_backoff_secs.min(rand_backoff);
        self.total += next_backoff;
        Duration::from_secs_f64(std::mem::replace(&mut self.next_backoff_secs, next_backoff))
    }

    /// Retry the fallible operation `f` with this backoff until it either
    /// breaks with a final result or the configured deadline expires.
    ///
    /// The operation decides after each attempt whether the loop continues:
    /// [`ControlFlow::Break`] carries the final result (success or a fatal
    /// error), [`ControlFlow::Continue`] carries the retryable error that is
    /// surfaced if the deadline expires first.
    pub async fn retry_with_backoff<R, F, B, E>(&mut self, request_name: &str, f: R) -> BackoffResult<B, E>
    where
        R: Fn() -> F + Send + Sync,
        F: std::future::Future<Output = ControlFlow<Result<B, E>, E>> + Send,
        E: std::error::Error + Send,
    {
        loop {
            let error = match f().await {
                ControlFlow::Break(result) => return result.map_err(|source| BackoffError {
                    deadline: Duration::from_secs_f64(self.total),
                    source,
                }),
                ControlFlow::Continue(e) => e,
            };

            let backoff = self.next();

            if let Some(deadline) = self.deadline {
                if self.total >= deadline {
                    return Err(BackoffError {
                        deadline: Duration::from_secs_f64(deadline),
                        source: error,
                    });
                }
            }

            info!(
                e=%error,
                request_name,
                backoff_secs = backoff.as_secs(),
                "request encountered non-fatal error - backing off",
            );
            tokio::time::sleep(backoff).await;
        }
    }
}
