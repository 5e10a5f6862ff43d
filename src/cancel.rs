//! Abandoning a retry sequence.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::scheduler::ScheduledTask;

/// Signals a retry sequence to stop.
///
/// Cloning a token shares it. Once cancelled, both loops stop before their
/// next attempt: the blocking loop wakes from its back-off wait immediately,
/// and the asynchronous loop aborts the scheduled task it is waiting on.
///
/// # Example
///
/// ```rust
/// use tidewater::CancellationToken;
/// use std::time::Duration;
///
/// let token = CancellationToken::new();
/// assert!(!token.is_cancelled());
///
/// token.cancel();
/// assert!(token.is_cancelled());
/// // a cancelled token never waits
/// assert!(token.wait(Duration::from_secs(60)));
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    wake: Condvar,
}

#[derive(Default)]
struct State {
    cancelled: bool,
    next_sequence: u64,
    pending: HashMap<u64, Slot>,
}

/// The task a live sequence is waiting on, tagged with the hop that
/// scheduled it.
#[derive(Default)]
struct Slot {
    hop: u64,
    task: Option<ScheduledTask>,
}

impl CancellationToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every sequence holding this token.
    pub fn cancel(&self) {
        let pending = {
            let mut state = self.lock();
            state.cancelled = true;
            std::mem::take(&mut state.pending)
        };
        self.inner.wake.notify_all();
        for task in pending.into_values().filter_map(|slot| slot.task) {
            task.cancel();
        }
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Block for up to `timeout`, returning early if cancelled.
    ///
    /// Returns true if the token is cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        while !state.cancelled {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => timeout,
            };
            if remaining.is_zero() {
                break;
            }
            state = self
                .inner
                .wake
                .wait_timeout(state, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        state.cancelled
    }

    /// Allocate an id for a sequence that will [`track`](Self::track) tasks.
    ///
    /// The sequence stays registered until [`release`](Self::release).
    pub(crate) fn register(&self) -> u64 {
        let mut state = self.lock();
        state.next_sequence += 1;
        let sequence = state.next_sequence;
        if !state.cancelled {
            state.pending.insert(sequence, Slot::default());
        }
        sequence
    }

    /// Remember the task `sequence` scheduled on its `hop`-th dispatch.
    ///
    /// A hop can run, and even finish the sequence, before the task that
    /// scheduled it gets here. So the handle is kept only while the sequence
    /// is registered and `hop` is newer than the hop already tracked;
    /// otherwise it is dropped, which leaves that task alone. If the token is
    /// already cancelled the task is cancelled right away.
    pub(crate) fn track(&self, sequence: u64, hop: u64, task: ScheduledTask) {
        let rejected = {
            let mut state = self.lock();
            if state.cancelled {
                Some(task)
            } else {
                if let Some(slot) = state.pending.get_mut(&sequence) {
                    if hop > slot.hop {
                        slot.hop = hop;
                        slot.task = Some(task);
                    }
                }
                None
            }
        };
        if let Some(task) = rejected {
            task.cancel();
        }
    }

    /// Forget `sequence` once it has finished.
    pub(crate) fn release(&self, sequence: u64) {
        self.lock().pending.remove(&sequence);
    }

    /// Number of sequences still registered.
    #[cfg(test)]
    pub(crate) fn registered(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::thread;

    #[test]
    fn test_wait_times_out_when_not_cancelled() {
        let token = CancellationToken::new();
        let start = Instant::now();
        assert!(!token.wait(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let cancelled = token.wait(Duration::from_secs(30));
                (cancelled, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(20));
        token.cancel();

        let (cancelled, waited) = waiter.join().unwrap();
        assert!(cancelled);
        assert!(waited < Duration::from_secs(30));
    }

    #[test]
    fn test_cancel_aborts_tracked_tasks() {
        let aborted = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let first = token.register();
        let second = token.register();
        assert_ne!(first, second);

        for sequence in [first, second] {
            token.track(sequence, 1, ScheduledTask::new({
                let aborted = aborted.clone();
                move || {
                    aborted.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        assert_eq!(aborted.load(Ordering::SeqCst), 0);
        token.cancel();
        assert_eq!(aborted.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_track_after_cancel_aborts_immediately() {
        let aborted = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::new();
        token.cancel();

        token.track(token.register(), 1, ScheduledTask::new({
            let aborted = aborted.clone();
            move || aborted.store(true, Ordering::SeqCst)
        }));
        assert!(aborted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_released_sequence_is_not_aborted() {
        let aborted = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::new();
        let sequence = token.register();
        token.track(sequence, 1, ScheduledTask::new({
            let aborted = aborted.clone();
            move || aborted.store(true, Ordering::SeqCst)
        }));

        token.release(sequence);
        assert_eq!(token.registered(), 0);
        token.cancel();
        assert!(!aborted.load(Ordering::SeqCst));
    }

    fn counting(counter: &Arc<AtomicU32>) -> ScheduledTask {
        let counter = counter.clone();
        ScheduledTask::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_track_after_release_is_dropped() {
        let aborted = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let sequence = token.register();

        // the hop finished the sequence before its scheduler got to track it
        token.release(sequence);
        token.track(sequence, 1, counting(&aborted));

        assert_eq!(token.registered(), 0);
        token.cancel();
        assert_eq!(aborted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stale_hop_does_not_replace_newer() {
        let stale = Arc::new(AtomicU32::new(0));
        let current = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let sequence = token.register();

        token.track(sequence, 2, counting(&current));
        token.track(sequence, 1, counting(&stale));
        assert_eq!(token.registered(), 1);

        token.cancel();
        assert_eq!(current.load(Ordering::SeqCst), 1);
        assert_eq!(stale.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_sequences_leave_nothing_registered() {
        let token = CancellationToken::new();
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let token = token.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let sequence = token.register();
                        let late = token.clone();
                        let hop = thread::spawn(move || late.release(sequence));
                        token.track(sequence, 1, ScheduledTask::detached());
                        hop.join().unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(token.registered(), 0);
    }

    #[test]
    fn test_debug() {
        let token = CancellationToken::new();
        assert_eq!(format!("{:?}", token), "CancellationToken { cancelled: false }");
    }
}
