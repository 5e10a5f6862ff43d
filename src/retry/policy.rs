//! Attempt budgets gating a retry sequence.
//!
//! A [`RetryPolicy`] is consulted before every attempt, independently of the
//! per-call attempt counter. The loops call [`refresh`](RetryPolicy::refresh)
//! once per sequence and query the returned instance from then on, so a
//! policy can keep per-sequence state, share state across sequences, or both.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A gate deciding whether another attempt may start.
pub trait RetryPolicy: fmt::Debug + Send + Sync {
    /// A policy instance scoped to one retry sequence.
    fn refresh(&self) -> Box<dyn RetryPolicy>;

    /// Whether budget remains for another attempt.
    ///
    /// Implementations that track a budget consume from it here; the loops
    /// call this exactly once per attempt.
    fn retryable(&self) -> bool;
}

/// The default policy: never runs out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlwaysRetryable;

impl RetryPolicy for AlwaysRetryable {
    fn refresh(&self) -> Box<dyn RetryPolicy> {
        Box::new(AlwaysRetryable)
    }

    fn retryable(&self) -> bool {
        true
    }
}

/// A ceiling on attempts shared by every sequence using this policy.
///
/// Useful as a coarse process-wide breaker: once `limit` attempts have been
/// made across all sequences, every further attempt is refused until
/// [`reset`](Self::reset) is called. Queries are lock-free.
///
/// # Example
///
/// ```rust
/// use tidewater::{RetryPolicy, SharedAttemptBudget};
///
/// let budget = SharedAttemptBudget::new(2);
/// let first = budget.refresh();
/// let second = budget.refresh();
///
/// assert!(first.retryable());
/// assert!(second.retryable());
/// assert!(!first.retryable());
/// assert_eq!(budget.remaining(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct SharedAttemptBudget {
    limit: u64,
    remaining: Arc<AtomicU64>,
}

impl SharedAttemptBudget {
    /// A budget allowing `limit` attempts in total.
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            remaining: Arc::new(AtomicU64::new(limit)),
        }
    }

    /// Attempts left in the budget.
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Restore the full budget.
    pub fn reset(&self) {
        self.remaining.store(self.limit, Ordering::Release);
    }
}

impl RetryPolicy for SharedAttemptBudget {
    fn refresh(&self) -> Box<dyn RetryPolicy> {
        Box::new(self.clone())
    }

    fn retryable(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// A per-sequence ceiling on elapsed time.
///
/// The clock starts at [`refresh`](RetryPolicy::refresh); attempts are
/// allowed until `limit` has elapsed.
#[derive(Debug, Clone)]
pub struct TimeBudget {
    limit: Duration,
    started: Option<Instant>,
}

impl TimeBudget {
    /// A budget allowing attempts for `limit` after the sequence starts.
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            started: None,
        }
    }

    /// The configured limit.
    pub fn limit(&self) -> Duration {
        self.limit
    }
}

impl RetryPolicy for TimeBudget {
    fn refresh(&self) -> Box<dyn RetryPolicy> {
        Box::new(Self {
            limit: self.limit,
            started: Some(Instant::now()),
        })
    }

    fn retryable(&self) -> bool {
        match self.started {
            Some(started) => started.elapsed() < self.limit,
            // not refreshed: never started, so nothing has elapsed
            None => !self.limit.is_zero(),
        }
    }
}

#[cfg(test)]
mod policy_tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_always_retryable() {
        let policy = AlwaysRetryable.refresh();
        for _ in 0..1000 {
            assert!(policy.retryable());
        }
    }

    #[test]
    fn test_shared_budget_spans_sequences() {
        let budget = SharedAttemptBudget::new(3);
        let a = budget.refresh();
        let b = budget.refresh();

        assert!(a.retryable());
        assert!(b.retryable());
        assert!(a.retryable());
        assert!(!b.retryable());
        assert!(!a.retryable());
        assert_eq!(budget.remaining(), 0);

        budget.reset();
        assert_eq!(budget.remaining(), 3);
        assert!(b.retryable());
    }

    #[test]
    fn test_shared_budget_concurrent_queries() {
        let budget = SharedAttemptBudget::new(1000);
        let granted = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let policy = budget.refresh();
                    scope.spawn(move || (0..500).filter(|_| policy.retryable()).count())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum::<usize>()
        });

        assert_eq!(granted, 1000);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_time_budget_expires() {
        let budget = TimeBudget::new(Duration::from_millis(20));
        let policy = budget.refresh();
        assert!(policy.retryable());

        thread::sleep(Duration::from_millis(30));
        assert!(!policy.retryable());

        // a fresh sequence gets a fresh clock
        assert!(budget.refresh().retryable());
    }

    #[test]
    fn test_zero_time_budget_refuses() {
        let budget = TimeBudget::new(Duration::ZERO);
        assert!(!budget.retryable());
        assert!(!budget.refresh().retryable());
    }
}
