//! The non-blocking retry loop.
//!
//! Each attempt runs as a task on a [`Scheduler`]. When an attempt fails with
//! a retryable failure, its task hands the whole sequence to a new task
//! scheduled after the back-off and returns; no thread ever waits. The
//! caller observes the outcome through a [`Deferred`] that resolves exactly
//! once.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::channel::oneshot;

use crate::cancel::CancellationToken;
use crate::failure::Failure;
use crate::retry::config::{RetryConfiguration, RetryEvent};
use crate::retry::error::{RetryError, RetryExhausted};
use crate::retry::policy::RetryPolicy;
use crate::retry::trace;
use crate::scheduler::{Scheduler, Task};

/// A unit of work the non-blocking loop can repeat.
///
/// Implemented for every `FnMut() -> impl Future<Output = Result<T, E>>`
/// that can move between threads.
pub trait AsyncRetryable<T, E>: Send + 'static {
    /// The future of a single attempt.
    type Future: Future<Output = Result<T, E>> + Send + 'static;

    /// Start one attempt.
    fn attempt(&mut self) -> Self::Future;
}

impl<T, E, F, Fut> AsyncRetryable<T, E> for F
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    type Future = Fut;

    fn attempt(&mut self) -> Fut {
        self()
    }
}

/// The eventual outcome of an asynchronous retry sequence.
///
/// If the scheduler drops the sequence before it finishes (for example
/// because it was cancelled or its runtime shut down), the deferred result
/// resolves to [`RetryError::Cancelled`].
#[must_use = "a deferred result does nothing unless awaited"]
pub struct Deferred<T, E> {
    outcome: oneshot::Receiver<Result<T, RetryError<E>>>,
    started: Arc<AtomicU32>,
}

impl<T, E> Deferred<T, E> {
    /// Number of attempts started so far.
    pub fn attempts_started(&self) -> u32 {
        self.started.load(Ordering::Acquire)
    }
}

impl<T, E> Future for Deferred<T, E> {
    type Output = Result<T, RetryError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.outcome).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(RetryError::Cancelled {
                attempts: self.attempts_started(),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("attempts_started", &self.attempts_started())
            .finish()
    }
}

/// Repeats an asynchronous operation without blocking any thread.
///
/// [`repeat`](Self::repeat) returns at once; even the first attempt runs as a
/// scheduled task. Attempt counting and exhaustion match [`RetryableLoop`]
/// exactly: a failure no condition matches resolves to
/// [`RetryError::NotRetryable`], and running out of attempts resolves to
/// [`RetryError::Exhausted`]. Attempt `n + 1` is scheduled after the
/// back-off for attempt `n + 1`, so the first retry waits
/// `base_delay * multiplier`.
///
/// [`RetryableLoop`]: crate::RetryableLoop
///
/// # Example
///
/// ```rust
/// # #[cfg(feature = "async")] {
/// use tidewater::{AsyncRetryableLoop, BackOffPolicy, HttpError, RetryCondition, RetryConfiguration};
/// use tidewater::scheduler::TokioScheduler;
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let config = RetryConfiguration::new(3)
///     .retry_on(RetryCondition::error_kind::<HttpError>())
///     .with_back_off(BackOffPolicy::new(Duration::from_millis(1), 2.0));
///
/// let calls = Arc::new(AtomicU32::new(0));
/// let deferred = AsyncRetryableLoop::new(config, TokioScheduler::current()).run({
///     let calls = calls.clone();
///     move || {
///         let n = calls.fetch_add(1, Ordering::SeqCst);
///         async move {
///             if n < 2 { Err(HttpError::connect("refused")) } else { Ok(n) }
///         }
///     }
/// });
///
/// assert_eq!(deferred.await.unwrap(), 2);
/// assert_eq!(calls.load(Ordering::SeqCst), 3);
/// # });
/// # }
/// ```
#[derive(Clone)]
pub struct AsyncRetryableLoop {
    config: Arc<RetryConfiguration>,
    scheduler: Arc<dyn Scheduler>,
    cancel: Option<CancellationToken>,
}

const MODE: &str = "async";

impl AsyncRetryableLoop {
    /// Create a loop driven by `config`, running attempts on `scheduler`.
    pub fn new<S: Scheduler>(config: impl Into<Arc<RetryConfiguration>>, scheduler: S) -> Self {
        Self::with_shared_scheduler(config, Arc::new(scheduler))
    }

    /// Create a loop running attempts on a shared scheduler.
    pub fn with_shared_scheduler(
        config: impl Into<Arc<RetryConfiguration>>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            config: config.into(),
            scheduler,
            cancel: None,
        }
    }

    /// Stop scheduling attempts once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// The configuration driving this loop.
    pub fn config(&self) -> &RetryConfiguration {
        &self.config
    }

    /// Repeat `retryable` up to the configured number of attempts.
    pub fn run<T, E, R>(&self, retryable: R) -> Deferred<T, E>
    where
        R: AsyncRetryable<T, E>,
        T: Send + 'static,
        E: Failure,
    {
        self.repeat(self.config.attempts(), retryable)
    }

    /// Repeat `retryable` up to `attempts` times.
    pub fn repeat<T, E, R>(&self, attempts: u32, retryable: R) -> Deferred<T, E>
    where
        R: AsyncRetryable<T, E>,
        T: Send + 'static,
        E: Failure,
    {
        let (reply, outcome) = oneshot::channel();
        let started = Arc::new(AtomicU32::new(0));
        let deferred = Deferred {
            outcome,
            started: Arc::clone(&started),
        };

        let policy = self.config.policy().refresh();
        if attempts == 0 || !policy.retryable() {
            trace::denied(MODE);
            let _ = reply.send(Err(RetryError::Denied { attempts: 0 }));
            return deferred;
        }

        let sequence = Sequence {
            retryable,
            attempts,
            attempt: 0,
            hop: 0,
            policy,
            config: Arc::clone(&self.config),
            scheduler: Arc::clone(&self.scheduler),
            cancel: self
                .cancel
                .as_ref()
                .map(|token| (token.clone(), token.register())),
            started,
            start: Instant::now(),
            reply,
        };
        sequence.dispatch(Duration::ZERO);

        deferred
    }
}

impl fmt::Debug for AsyncRetryableLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncRetryableLoop")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// One retry sequence, moved from task to task.
struct Sequence<R, T, E> {
    retryable: R,
    attempts: u32,
    attempt: u32,
    hop: u64,
    policy: Box<dyn RetryPolicy>,
    config: Arc<RetryConfiguration>,
    scheduler: Arc<dyn Scheduler>,
    cancel: Option<(CancellationToken, u64)>,
    started: Arc<AtomicU32>,
    start: Instant,
    reply: oneshot::Sender<Result<T, RetryError<E>>>,
}

impl<R, T, E> Sequence<R, T, E>
where
    R: AsyncRetryable<T, E>,
    T: Send + 'static,
    E: Failure,
{
    fn dispatch(mut self, delay: Duration) {
        self.hop += 1;
        let hop = self.hop;
        let scheduler = Arc::clone(&self.scheduler);
        let cancel = self.cancel.clone();
        // the hop may already have run by the time it is tracked
        let handle = scheduler.schedule(delay, self.step());
        if let Some((token, id)) = cancel {
            token.track(id, hop, handle);
        }
    }

    fn step(mut self) -> Task {
        Box::pin(async move {
            if self.is_cancelled() {
                trace::cancelled(MODE, self.attempt);
                let attempts = self.attempt;
                return self.finish(Err(RetryError::Cancelled { attempts }));
            }

            self.attempt += 1;
            self.started.store(self.attempt, Ordering::Release);

            let error = match self.retryable.attempt().await {
                Ok(value) => return self.finish(Ok(value)),
                Err(error) => error,
            };

            if !self.config.conditions().matches(&error) {
                trace::not_retryable(MODE, self.attempt, &error);
                return self.finish(Err(RetryError::NotRetryable(error)));
            }

            if self.attempt >= self.attempts || !self.policy.retryable() {
                trace::exhausted(MODE, self.attempt, &error);
                let exhausted = RetryExhausted::new(error, self.attempt, self.start.elapsed());
                return self.finish(Err(exhausted.into()));
            }

            let delay = self.config.back_off().delay_for(self.attempt + 1);
            self.config.notify(&RetryEvent {
                attempt: self.attempt,
                error: &error,
                next_delay: delay,
                elapsed: self.start.elapsed(),
            });
            trace::retrying(MODE, self.attempt, delay, &error);

            self.dispatch(delay);
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|(token, _)| token.is_cancelled())
    }

    fn finish(self, outcome: Result<T, RetryError<E>>) {
        if let Some((token, id)) = &self.cancel {
            token.release(*id);
        }
        // the caller may have dropped the deferred result
        let _ = self.reply.send(outcome);
    }
}
