//! Running tasks after a delay without blocking a thread.
//!
//! The asynchronous retry loop never sleeps: every wait between attempts is
//! represented by a task handed to a [`Scheduler`], and the next attempt runs
//! when that task fires.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;

/// A unit of scheduled work.
pub type Task = BoxFuture<'static, ()>;

/// Runs a task once `delay` has elapsed.
///
/// Implementations must not block the calling thread in `schedule`.
pub trait Scheduler: fmt::Debug + Send + Sync + 'static {
    /// Schedule `task` to start after `delay`.
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask;
}

/// Handle to a scheduled task.
///
/// Dropping the handle leaves the task running; call
/// [`cancel`](ScheduledTask::cancel) to stop it.
pub struct ScheduledTask {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl ScheduledTask {
    /// A handle that runs `cancel` when cancelled.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle that cannot cancel anything.
    pub fn detached() -> Self {
        Self { cancel: None }
    }

    /// Stop the task if it has not completed yet.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// A [`Scheduler`] backed by a tokio runtime.
///
/// Each task is spawned onto the runtime and waits on a tokio timer, so any
/// number of retry sequences can sit in back-off without holding a thread.
///
/// # Example
///
/// ```rust
/// use tidewater::scheduler::{Scheduler, TokioScheduler};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let scheduler = TokioScheduler::current();
/// let (tx, rx) = futures::channel::oneshot::channel();
/// scheduler.schedule(Duration::from_millis(1), Box::pin(async move {
///     let _ = tx.send(42);
/// }));
/// assert_eq!(rx.await.unwrap(), 42);
/// # });
/// ```
#[cfg(feature = "async")]
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "async")]
impl TokioScheduler {
    /// Schedule onto the given runtime.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Schedule onto the runtime of the current context.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime; use
    /// [`try_current`](Self::try_current) to handle that case.
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }

    /// Schedule onto the runtime of the current context, if there is one.
    pub fn try_current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

#[cfg(feature = "async")]
impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> ScheduledTask {
        let join = self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task.await;
        });
        ScheduledTask::new(move || join.abort())
    }
}
