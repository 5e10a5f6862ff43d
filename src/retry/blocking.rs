//! The blocking retry loop.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::failure::Failure;
use crate::retry::config::{RetryConfiguration, RetryEvent};
use crate::retry::error::{RetryError, RetryExhausted};
use crate::retry::trace;

/// A unit of work the blocking loop can repeat.
///
/// Implemented for every `FnMut() -> Result<T, E>`.
pub trait Retryable<T, E> {
    /// Perform one attempt.
    fn attempt(&mut self) -> Result<T, E>;
}

impl<T, E, F> Retryable<T, E> for F
where
    F: FnMut() -> Result<T, E>,
{
    fn attempt(&mut self) -> Result<T, E> {
        self()
    }
}

type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Repeats an operation on the calling thread, sleeping between attempts.
///
/// The loop ends with the first success, with the first failure no
/// condition matches, or with [`RetryError::Exhausted`] once the attempts or
/// the policy budget run out. The wait before attempt `n + 1` is the
/// back-off for attempt `n`; there is no wait after the final attempt.
///
/// # Example
///
/// ```rust
/// use tidewater::{BackOffPolicy, ErrorResponse, HttpError, RetryCondition, RetryConfiguration, RetryableLoop};
/// use http::StatusCode;
/// use std::time::Duration;
///
/// let config = RetryConfiguration::new(3)
///     .retry_on(RetryCondition::server_errors())
///     .with_back_off(BackOffPolicy::new(Duration::from_millis(1), 2.0));
///
/// let mut calls = 0;
/// let result = RetryableLoop::new(config).run(|| {
///     calls += 1;
///     if calls < 3 {
///         Err(HttpError::status(ErrorResponse::new(StatusCode::BAD_GATEWAY)))
///     } else {
///         Ok("pong")
///     }
/// });
///
/// assert_eq!(result.unwrap(), "pong");
/// assert_eq!(calls, 3);
/// ```
#[derive(Clone)]
pub struct RetryableLoop {
    config: Arc<RetryConfiguration>,
    sleeper: Option<Sleeper>,
    cancel: Option<CancellationToken>,
}

const MODE: &str = "blocking";

impl RetryableLoop {
    /// Create a loop driven by `config`.
    pub fn new(config: impl Into<Arc<RetryConfiguration>>) -> Self {
        Self {
            config: config.into(),
            sleeper: None,
            cancel: None,
        }
    }

    /// Replace the back-off wait with `sleeper`.
    ///
    /// The default blocks the thread with [`std::thread::sleep`], or on the
    /// cancellation token when one is set.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Fn(Duration) + Send + Sync + 'static,
    {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    /// Stop retrying once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The configuration driving this loop.
    pub fn config(&self) -> &RetryConfiguration {
        &self.config
    }

    /// Repeat `retryable` up to the configured number of attempts.
    pub fn run<T, E, R>(&self, retryable: R) -> Result<T, RetryError<E>>
    where
        R: Retryable<T, E>,
        E: Failure,
    {
        self.repeat(self.config.attempts(), retryable)
    }

    /// Repeat `retryable` up to `attempts` times.
    pub fn repeat<T, E, R>(&self, attempts: u32, mut retryable: R) -> Result<T, RetryError<E>>
    where
        R: Retryable<T, E>,
        E: Failure,
    {
        let policy = self.config.policy().refresh();
        let start = Instant::now();

        if attempts == 0 || !policy.retryable() {
            trace::denied(MODE);
            return Err(RetryError::Denied { attempts: 0 });
        }

        let mut attempt = 0u32;
        loop {
            if self.is_cancelled() {
                trace::cancelled(MODE, attempt);
                return Err(RetryError::Cancelled { attempts: attempt });
            }

            attempt += 1;
            let error = match retryable.attempt() {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !self.config.conditions().matches(&error) {
                trace::not_retryable(MODE, attempt, &error);
                return Err(RetryError::NotRetryable(error));
            }

            if attempt >= attempts || !policy.retryable() {
                trace::exhausted(MODE, attempt, &error);
                return Err(RetryExhausted::new(error, attempt, start.elapsed()).into());
            }

            let delay = self.config.back_off().delay_for(attempt);
            self.config.notify(&RetryEvent {
                attempt,
                error: &error,
                next_delay: delay,
                elapsed: start.elapsed(),
            });
            trace::retrying(MODE, attempt, delay, &error);

            if self.pause(delay) {
                trace::cancelled(MODE, attempt);
                return Err(RetryError::Cancelled { attempts: attempt });
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Wait out `delay`; returns true if cancelled meanwhile.
    fn pause(&self, delay: Duration) -> bool {
        match (&self.sleeper, &self.cancel) {
            (Some(sleep), _) => {
                sleep(delay);
                self.is_cancelled()
            }
            (None, Some(token)) => token.wait(delay),
            (None, None) => {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                false
            }
        }
    }
}

impl fmt::Debug for RetryableLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryableLoop")
            .field("config", &self.config)
            .field("custom_sleeper", &self.sleeper.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}
