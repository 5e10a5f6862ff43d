//! Testing utilities for code that retries.
//!
//! Retry loops wait, and tests should not. This module provides stand-ins for
//! the two kinds of waiting plus a scripted operation and assertion macros.
//!
//! # Examples
//!
//! ## ManualScheduler
//!
//! ```rust
//! use tidewater::testing::{FlakyOperation, ManualScheduler};
//! use tidewater::{AsyncRetryableLoop, BackOffPolicy, RetryCondition, RetryConfiguration};
//! use std::time::Duration;
//!
//! let config = RetryConfiguration::new(3)
//!     .retry_on(RetryCondition::error_kind::<std::io::Error>())
//!     .with_back_off(BackOffPolicy::new(Duration::from_secs(1), 2.0));
//!
//! let scheduler = ManualScheduler::new();
//! let op = FlakyOperation::new(2, |_| std::io::Error::other("reset"));
//! let deferred = AsyncRetryableLoop::new(config, scheduler.clone()).run(op.scheduled());
//!
//! // nothing runs until the scheduler is driven
//! assert_eq!(op.calls(), 0);
//! scheduler.run_until_idle();
//!
//! assert_eq!(op.calls(), 3);
//! // waits of 2s and 4s: the back-off for attempts 2 and 3
//! assert_eq!(scheduler.elapsed(), Duration::from_secs(6));
//! assert_eq!(futures::executor::block_on(deferred).unwrap(), 3);
//! ```
//!
//! ## Assertion Macros
//!
//! ```rust
//! use tidewater::testing::{FlakyOperation, RecordingSleeper};
//! use tidewater::{assert_exhausted, RetryCondition, RetryConfiguration, RetryableLoop};
//!
//! let config = RetryConfiguration::new(2).retry_on(RetryCondition::error_kind::<std::io::Error>());
//! let sleeper = RecordingSleeper::new();
//! let op = FlakyOperation::always(|_| std::io::Error::other("down"));
//!
//! let result = RetryableLoop::new(config).with_sleeper(sleeper.sleeper()).run(op.blocking());
//! let exhausted = assert_exhausted!(result, 2);
//! assert_eq!(exhausted.final_error.to_string(), "down");
//! ```

use std::fmt;
use std::future::{ready, Ready};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::scheduler::{ScheduledTask, Scheduler, Task};

/// A [`Scheduler`] driven by hand on a virtual clock.
///
/// Scheduled tasks are queued with their due time and run only when the test
/// calls [`run_next`](Self::run_next), [`advance`](Self::advance) or
/// [`run_until_idle`](Self::run_until_idle). Tasks run on the calling thread
/// via [`futures::executor::block_on`], so they must not depend on a tokio
/// runtime.
///
/// Clones share the same queue and clock.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    queue: Vec<Queued>,
    delays: Vec<Duration>,
}

struct Queued {
    id: u64,
    due: Duration,
    task: Task,
}

impl ManualScheduler {
    /// Create a scheduler with an empty queue at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    /// Every delay requested so far, in scheduling order.
    pub fn delays(&self) -> Vec<Duration> {
        self.lock().delays.clone()
    }

    /// Virtual time elapsed.
    pub fn elapsed(&self) -> Duration {
        self.lock().now
    }

    /// Run the earliest due task, moving the clock forward to its due time.
    ///
    /// Returns false if the queue was empty.
    pub fn run_next(&self) -> bool {
        let next = {
            let mut state = self.lock();
            let index = state
                .queue
                .iter()
                .enumerate()
                .min_by_key(|(_, queued)| (queued.due, queued.id))
                .map(|(index, _)| index);
            index.map(|index| {
                let queued = state.queue.remove(index);
                state.now = state.now.max(queued.due);
                queued
            })
        };

        match next {
            Some(queued) => {
                futures::executor::block_on(queued.task);
                true
            }
            None => false,
        }
    }

    /// Move the clock forward by `by`, running every task that falls due.
    ///
    /// Tasks scheduled by those tasks run too if they fall due in the window.
    /// Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let until = self.elapsed() + by;
        let mut ran = 0;
        while self.next_due().is_some_and(|due| due <= until) {
            self.run_next();
            ran += 1;
        }
        self.lock().now = until;
        ran
    }

    /// Run tasks until none are left, returning how many ran.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    fn next_due(&self) -> Option<Duration> {
        self.lock().queue.iter().map(|queued| queued.due).min()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        lock(&self.state)
    }
}

fn lock(state: &Mutex<ManualState>) -> MutexGuard<'_, ManualState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = state.next_id;
            let due = state.now.saturating_add(delay);
            state.delays.push(delay);
            state.queue.push(Queued { id, due, task });
            id
        };

        let state: Weak<Mutex<ManualState>> = Arc::downgrade(&self.state);
        ScheduledTask::new(move || {
            if let Some(state) = state.upgrade() {
                let removed = {
                    let mut state = lock(&state);
                    let index = state.queue.iter().position(|queued| queued.id == id);
                    index.map(|index| state.queue.remove(index))
                };
                drop(removed);
            }
        })
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("pending", &state.queue.len())
            .finish()
    }
}

/// Records the waits of a [`RetryableLoop`](crate::RetryableLoop) instead of
/// sleeping.
///
/// ```rust
/// use tidewater::testing::RecordingSleeper;
/// use std::time::Duration;
///
/// let sleeper = RecordingSleeper::new();
/// let sleep = sleeper.sleeper();
/// sleep(Duration::from_millis(5));
/// assert_eq!(sleeper.waits(), vec![Duration::from_millis(5)]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    waits: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    /// Create a sleeper with no recorded waits.
    pub fn new() -> Self {
        Self::default()
    }

    /// A sleep function to pass to
    /// [`RetryableLoop::with_sleeper`](crate::RetryableLoop::with_sleeper).
    pub fn sleeper(&self) -> impl Fn(Duration) + Send + Sync + 'static {
        let waits = Arc::clone(&self.waits);
        move |delay| {
            waits
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(delay)
        }
    }

    /// Every wait requested so far.
    pub fn waits(&self) -> Vec<Duration> {
        self.waits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sum of all recorded waits.
    pub fn total(&self) -> Duration {
        self.waits().into_iter().sum()
    }
}

type ErrorFactory<E> = Arc<dyn Fn(u32) -> E + Send + Sync>;

/// An operation that fails a fixed number of times, then succeeds.
///
/// Each call returns the 1-indexed call number on success, and the error
/// built by the factory from that call number on failure. Clones share the
/// call counter.
pub struct FlakyOperation<E> {
    failures: u32,
    calls: Arc<AtomicU32>,
    error: ErrorFactory<E>,
}

impl<E> FlakyOperation<E> {
    /// Fail the first `failures` calls with errors built by `error`.
    pub fn new<F>(failures: u32, error: F) -> Self
    where
        F: Fn(u32) -> E + Send + Sync + 'static,
    {
        Self {
            failures,
            calls: Arc::new(AtomicU32::new(0)),
            error: Arc::new(error),
        }
    }

    /// Never succeed.
    pub fn always<F>(error: F) -> Self
    where
        F: Fn(u32) -> E + Send + Sync + 'static,
    {
        Self::new(u32::MAX, error)
    }

    /// Perform one call.
    pub fn call(&self) -> Result<u32, E> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err((self.error)(call))
        } else {
            Ok(call)
        }
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// A closure for the blocking loop.
    pub fn blocking(&self) -> impl FnMut() -> Result<u32, E> + Send + 'static
    where
        E: 'static,
    {
        let op = self.clone();
        move || op.call()
    }

    /// A closure for the asynchronous loop.
    pub fn scheduled(&self) -> impl FnMut() -> Ready<Result<u32, E>> + Send + 'static
    where
        E: Send + 'static,
    {
        let op = self.clone();
        move || ready(op.call())
    }
}

impl<E> Clone for FlakyOperation<E> {
    fn clone(&self) -> Self {
        Self {
            failures: self.failures,
            calls: Arc::clone(&self.calls),
            error: Arc::clone(&self.error),
        }
    }
}

impl<E> fmt::Debug for FlakyOperation<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlakyOperation")
            .field("failures", &self.failures)
            .field("calls", &self.calls())
            .finish()
    }
}

/// Assert that a retry result is [`RetryError::Exhausted`](crate::RetryError::Exhausted),
/// optionally after an exact number of attempts.
///
/// Evaluates to the [`RetryExhausted`](crate::RetryExhausted) value.
///
/// # Example
///
/// ```rust
/// use tidewater::{assert_exhausted, RetryError, RetryExhausted};
/// use std::time::Duration;
///
/// let result: Result<(), RetryError<&str>> =
///     Err(RetryExhausted::new("boom", 3, Duration::ZERO).into());
/// let exhausted = assert_exhausted!(result, 3);
/// assert_eq!(exhausted.final_error, "boom");
/// ```
#[macro_export]
macro_rules! assert_exhausted {
    ($result:expr) => {
        match $result {
            Err($crate::RetryError::Exhausted(exhausted)) => exhausted,
            other => panic!("Expected Exhausted, got {:?}", other),
        }
    };
    ($result:expr, $attempts:expr) => {{
        let exhausted = $crate::assert_exhausted!($result);
        assert_eq!(
            exhausted.attempts, $attempts,
            "Expected exhaustion after {} attempts, got {}",
            $attempts, exhausted.attempts
        );
        exhausted
    }};
}

/// Assert that a retry result is [`RetryError::NotRetryable`](crate::RetryError::NotRetryable).
///
/// Evaluates to the unwrapped failure.
///
/// # Example
///
/// ```rust
/// use tidewater::{assert_not_retryable, RetryError};
///
/// let result: Result<(), RetryError<&str>> = Err(RetryError::NotRetryable("bad request"));
/// assert_eq!(assert_not_retryable!(result), "bad request");
/// ```
#[macro_export]
macro_rules! assert_not_retryable {
    ($result:expr) => {
        match $result {
            Err($crate::RetryError::NotRetryable(error)) => error,
            other => panic!("Expected NotRetryable, got {:?}", other),
        }
    };
}
