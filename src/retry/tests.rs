//! Tests exercising both retry loops end to end.

use super::*;
use crate::backoff::BackOffPolicy;
use crate::cancel::CancellationToken;
use crate::condition::RetryCondition;
use crate::failure::{ErrorResponse, HttpError};
use crate::testing::{FlakyOperation, ManualScheduler, RecordingSleeper};
use crate::{assert_exhausted, assert_not_retryable};
use futures::executor::block_on;
use http::StatusCode;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn io_config(attempts: u32) -> RetryConfiguration {
    RetryConfiguration::new(attempts)
        .retry_on(RetryCondition::error_kind::<io::Error>())
        .with_back_off(BackOffPolicy::new(Duration::from_millis(1000), 2.0))
}

fn reset(call: u32) -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionReset, format!("reset #{}", call))
}

fn blocking(config: RetryConfiguration) -> (RetryableLoop, RecordingSleeper) {
    let sleeper = RecordingSleeper::new();
    let retry = RetryableLoop::new(config).with_sleeper(sleeper.sleeper());
    (retry, sleeper)
}

fn millis(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_millis).collect()
}

// blocking loop

#[test]
fn test_blocking_non_retryable_failure_calls_once() {
    let (retry, sleeper) = blocking(io_config(5));
    let op = FlakyOperation::always(|_| HttpError::status(ErrorResponse::new(StatusCode::NOT_FOUND)));

    let error = assert_not_retryable!(retry.run(op.blocking()));

    assert!(error.is_status());
    assert_eq!(op.calls(), 1);
    assert!(sleeper.waits().is_empty());
}

#[test]
fn test_blocking_succeeds_on_third_attempt() {
    let (retry, sleeper) = blocking(io_config(5));
    let op = FlakyOperation::new(2, reset);

    assert_eq!(retry.run(op.blocking()).unwrap(), 3);
    assert_eq!(op.calls(), 3);
    assert_eq!(sleeper.waits(), millis(&[1000, 2000]));
}

#[test]
fn test_blocking_exhaustion_wraps_last_failure() {
    let (retry, sleeper) = blocking(io_config(3));
    let op = FlakyOperation::always(reset);

    let exhausted = assert_exhausted!(retry.run(op.blocking()), 3);

    assert_eq!(exhausted.final_error.to_string(), "reset #3");
    assert_eq!(op.calls(), 3);
    // no wait after the final attempt
    assert_eq!(sleeper.waits(), millis(&[1000, 2000]));
}

#[test]
fn test_blocking_single_attempt_never_waits() {
    let (retry, sleeper) = blocking(io_config(5));
    let op = FlakyOperation::always(reset);

    let exhausted = assert_exhausted!(retry.repeat(1, op.blocking()), 1);

    assert_eq!(exhausted.final_error.kind(), io::ErrorKind::ConnectionReset);
    assert_eq!(op.calls(), 1);
    assert!(sleeper.waits().is_empty());
}

#[test]
fn test_blocking_zero_attempts_is_denied() {
    let (retry, _) = blocking(io_config(3));
    let op = FlakyOperation::new(0, reset);

    let result = retry.repeat(0, op.blocking());

    assert_eq!(result.unwrap_err().attempts(), Some(0));
    assert_eq!(op.calls(), 0);
}

#[test]
fn test_blocking_back_off_sequence() {
    let config = RetryConfiguration::new(6)
        .retry_on(RetryCondition::server_errors())
        .with_back_off(BackOffPolicy::new(Duration::from_millis(2000), 1.5));
    let (retry, sleeper) = blocking(config);
    let op = FlakyOperation::always(|_| {
        HttpError::status(ErrorResponse::new(StatusCode::SERVICE_UNAVAILABLE))
    });

    assert_exhausted!(retry.run(op.blocking()), 6);
    assert_eq!(sleeper.waits(), millis(&[2000, 3000, 4500, 6750, 10125]));
}

#[test]
fn test_blocking_cancel_during_wait() {
    let token = CancellationToken::new();
    let op = FlakyOperation::always(reset);
    let retry = RetryableLoop::new(io_config(5))
        .with_cancellation(token.clone())
        .with_sleeper({
            let token = token.clone();
            move |_| token.cancel()
        });

    let result = retry.run(op.blocking());

    assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1 })));
    assert_eq!(op.calls(), 1);
}

#[test]
fn test_blocking_cancel_before_start() {
    let token = CancellationToken::new();
    token.cancel();
    let op = FlakyOperation::new(0, reset);
    let retry = RetryableLoop::new(io_config(5)).with_cancellation(token);

    let result = retry.run(op.blocking());

    assert!(matches!(result, Err(RetryError::Cancelled { attempts: 0 })));
    assert_eq!(op.calls(), 0);
}

#[test]
fn test_blocking_token_wait_is_interrupted() {
    let token = CancellationToken::new();
    let retry = RetryableLoop::new(
        RetryConfiguration::new(3)
            .retry_on(RetryCondition::error_kind::<io::Error>())
            .with_back_off(BackOffPolicy::new(Duration::from_secs(30), 1.0)),
    )
    .with_cancellation(token.clone());

    let canceller = std::thread::spawn({
        let token = token.clone();
        move || {
            std::thread::sleep(Duration::from_millis(20));
            token.cancel();
        }
    });

    let start = std::time::Instant::now();
    let result: Result<(), _> = retry.run(|| Err(reset(1)));
    canceller.join().unwrap();

    assert!(result.unwrap_err().is_cancelled());
    assert!(start.elapsed() < Duration::from_secs(30));
}

#[test]
fn test_blocking_hook_sees_every_retry() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let config = io_config(4).on_retry({
        let events = events.clone();
        move |event| {
            events
                .lock()
                .unwrap()
                .push((event.attempt, event.next_delay, event.error.to_string()))
        }
    });
    let (retry, _) = blocking(config);

    assert_exhausted!(retry.run(FlakyOperation::always(reset).blocking()), 4);

    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![
            (1, Duration::from_millis(1000), "reset #1".to_string()),
            (2, Duration::from_millis(2000), "reset #2".to_string()),
            (3, Duration::from_millis(4000), "reset #3".to_string()),
        ]
    );
}

#[test]
fn test_blocking_shared_budget_denies_and_exhausts() {
    let budget = SharedAttemptBudget::new(3);
    let (retry, _) = blocking(io_config(5).with_policy(budget.clone()));

    // the gate consumes one unit, each retry decision another
    let op = FlakyOperation::always(reset);
    let exhausted = assert_exhausted!(retry.run(op.blocking()), 3);
    assert_eq!(exhausted.final_error.to_string(), "reset #3");
    assert_eq!(budget.remaining(), 0);

    let denied = retry.run(FlakyOperation::new(0, reset).blocking());
    assert!(matches!(denied, Err(RetryError::Denied { attempts: 0 })));
    assert!(denied.unwrap_err().is_exhausted());

    budget.reset();
    assert_eq!(retry.run(FlakyOperation::new(0, reset).blocking()).unwrap(), 1);
}

#[test]
fn test_blocking_time_budget() {
    let config = RetryConfiguration::new(10)
        .retry_on(RetryCondition::error_kind::<io::Error>())
        .with_back_off(BackOffPolicy::new(Duration::from_millis(15), 1.0))
        .with_policy(TimeBudget::new(Duration::from_millis(20)));
    let op = FlakyOperation::always(reset);

    let exhausted = assert_exhausted!(RetryableLoop::new(config).run(op.blocking()));

    assert!(exhausted.attempts < 10);
    assert!(exhausted.total_duration >= Duration::from_millis(15));
}

// scheduled loop

#[test]
fn test_async_repeat_returns_before_any_attempt() {
    let scheduler = ManualScheduler::new();
    let op = FlakyOperation::new(0, reset);

    let deferred = AsyncRetryableLoop::new(io_config(3), scheduler.clone()).run(op.scheduled());

    assert_eq!(op.calls(), 0);
    assert_eq!(deferred.attempts_started(), 0);
    assert_eq!(scheduler.pending(), 1);

    assert_eq!(scheduler.run_until_idle(), 1);
    assert_eq!(block_on(deferred).unwrap(), 1);
}

#[test]
fn test_async_waits_are_scheduled_not_slept() {
    let scheduler = ManualScheduler::new();
    let op = FlakyOperation::new(2, reset);

    let deferred = AsyncRetryableLoop::new(io_config(5), scheduler.clone()).run(op.scheduled());

    assert!(scheduler.run_next());
    assert_eq!(op.calls(), 1);
    assert_eq!(scheduler.pending(), 1);

    // attempt 2 waits the back-off for attempt 2
    assert_eq!(scheduler.advance(Duration::from_millis(1999)), 0);
    assert_eq!(op.calls(), 1);
    assert_eq!(scheduler.advance(Duration::from_millis(1)), 1);
    assert_eq!(op.calls(), 2);

    scheduler.run_until_idle();
    assert_eq!(op.calls(), 3);
    assert_eq!(scheduler.delays(), millis(&[0, 2000, 4000]));
    assert_eq!(block_on(deferred).unwrap(), 3);
}

#[test]
fn test_async_non_retryable_failure_calls_once() {
    let scheduler = ManualScheduler::new();
    let op = FlakyOperation::always(|_| HttpError::status(ErrorResponse::new(StatusCode::BAD_REQUEST)));
    let config = RetryConfiguration::new(5).retry_on(RetryCondition::server_errors());

    let deferred = AsyncRetryableLoop::new(config, scheduler.clone()).run(op.scheduled());
    scheduler.run_until_idle();

    let error = assert_not_retryable!(block_on(deferred));
    assert_eq!(error.to_string(), "server responded with 400 Bad Request");
    assert_eq!(op.calls(), 1);
}

#[test]
fn test_async_exhaustion_counts_like_blocking() {
    let op = FlakyOperation::always(reset);
    let scheduler = ManualScheduler::new();
    let deferred = AsyncRetryableLoop::new(io_config(3), scheduler.clone()).run(op.scheduled());
    scheduler.run_until_idle();
    let scheduled = assert_exhausted!(block_on(deferred), 3);

    let (retry, sleeper) = blocking(io_config(3));
    let blocked = assert_exhausted!(retry.run(FlakyOperation::always(reset).blocking()), 3);

    assert_eq!(scheduled.final_error.to_string(), blocked.final_error.to_string());
    assert_eq!(scheduled.attempts, blocked.attempts);
    // the blocking loop waits back_off(n) after attempt n, the scheduled loop back_off(n + 1)
    assert_eq!(sleeper.waits(), millis(&[1000, 2000]));
    assert_eq!(scheduler.delays(), millis(&[0, 2000, 4000]));
}

#[test]
fn test_async_zero_attempts_is_denied_immediately() {
    let scheduler = ManualScheduler::new();
    let op = FlakyOperation::new(0, reset);

    let deferred = AsyncRetryableLoop::new(io_config(3), scheduler.clone()).repeat(0, op.scheduled());

    assert_eq!(scheduler.pending(), 0);
    assert!(matches!(block_on(deferred), Err(RetryError::Denied { attempts: 0 })));
    assert_eq!(op.calls(), 0);
}

#[test]
fn test_async_cancel_aborts_pending_retry() {
    let scheduler = ManualScheduler::new();
    let token = CancellationToken::new();
    let op = FlakyOperation::always(reset);

    let deferred = AsyncRetryableLoop::new(io_config(5), scheduler.clone())
        .with_cancellation(token.clone())
        .run(op.scheduled());

    assert!(scheduler.run_next());
    assert_eq!(scheduler.pending(), 1);

    token.cancel();

    assert_eq!(scheduler.pending(), 0);
    assert!(matches!(block_on(deferred), Err(RetryError::Cancelled { attempts: 1 })));
    assert_eq!(op.calls(), 1);
}

#[test]
fn test_async_cancel_one_token_many_sequences() {
    let scheduler = ManualScheduler::new();
    let token = CancellationToken::new();
    let retry = AsyncRetryableLoop::new(io_config(5), scheduler.clone()).with_cancellation(token.clone());

    let first = retry.run(FlakyOperation::always(reset).scheduled());
    let second = retry.run(FlakyOperation::always(reset).scheduled());
    assert_eq!(scheduler.pending(), 2);

    token.cancel();

    assert_eq!(scheduler.pending(), 0);
    assert!(block_on(first).unwrap_err().is_cancelled());
    assert!(block_on(second).unwrap_err().is_cancelled());
}

#[test]
fn test_async_shared_budget() {
    let budget = SharedAttemptBudget::new(2);
    let scheduler = ManualScheduler::new();
    let retry = AsyncRetryableLoop::new(io_config(5).with_policy(budget.clone()), scheduler.clone());

    let first = retry.run(FlakyOperation::always(reset).scheduled());
    scheduler.run_until_idle();
    assert_exhausted!(block_on(first), 2);
    assert_eq!(budget.remaining(), 0);

    let second = retry.run(FlakyOperation::new(0, reset).scheduled());
    assert!(matches!(block_on(second), Err(RetryError::Denied { attempts: 0 })));
}

#[test]
fn test_async_hook_runs_before_scheduling() {
    let scheduler = ManualScheduler::new();
    let seen = Arc::new(AtomicU32::new(0));
    let config = io_config(3).on_retry({
        let seen = seen.clone();
        let scheduler = scheduler.clone();
        move |event| {
            // the next attempt is not queued yet
            assert_eq!(scheduler.pending(), 0);
            assert_eq!(event.next_delay, Duration::from_millis(1000 << event.attempt));
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });

    let deferred = AsyncRetryableLoop::new(config, scheduler.clone())
        .run(FlakyOperation::always(reset).scheduled());
    scheduler.run_until_idle();

    assert_exhausted!(block_on(deferred), 3);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

#[test]
fn test_async_dropped_deferred_does_not_stop_sequence() {
    let scheduler = ManualScheduler::new();
    let op = FlakyOperation::new(1, reset);

    drop(AsyncRetryableLoop::new(io_config(3), scheduler.clone()).run(op.scheduled()));
    scheduler.run_until_idle();

    assert_eq!(op.calls(), 2);
}

#[cfg(feature = "async")]
mod tokio_runtime {
    use super::*;
    use crate::scheduler::TokioScheduler;

    fn fast_config(attempts: u32) -> RetryConfiguration {
        RetryConfiguration::new(attempts)
            .retry_on(RetryCondition::error_kind::<io::Error>())
            .with_back_off(BackOffPolicy::new(Duration::from_millis(5), 2.0))
    }

    #[tokio::test]
    async fn test_tokio_eventual_success() {
        let op = FlakyOperation::new(2, reset);
        let retry = AsyncRetryableLoop::new(fast_config(5), TokioScheduler::current());

        assert_eq!(retry.run(op.scheduled()).await.unwrap(), 3);
        assert_eq!(op.calls(), 3);
    }

    #[tokio::test]
    async fn test_tokio_attempts_can_await() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry = AsyncRetryableLoop::new(fast_config(3), TokioScheduler::current());

        let result = retry
            .run({
                let calls = calls.clone();
                move || {
                    let calls = calls.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        if n < 3 {
                            Err(reset(n))
                        } else {
                            Ok("done")
                        }
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_exhaustion_uses_back_off() {
        let start = tokio::time::Instant::now();
        let retry = AsyncRetryableLoop::new(io_config(3), TokioScheduler::current());

        let exhausted = assert_exhausted!(retry.run(FlakyOperation::always(reset).scheduled()).await, 3);

        assert_eq!(exhausted.final_error.to_string(), "reset #3");
        assert!(start.elapsed() >= Duration::from_millis(2000 + 4000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_tokio_finished_sequences_leave_token_empty() {
        let token = CancellationToken::new();
        let config = RetryConfiguration::new(3)
            .retry_on(RetryCondition::error_kind::<io::Error>())
            .with_back_off(BackOffPolicy::new(Duration::ZERO, 1.0));
        let retry = AsyncRetryableLoop::new(config, TokioScheduler::current())
            .with_cancellation(token.clone());

        let deferred: Vec<_> = (0..2000)
            .map(|n| retry.run(FlakyOperation::new(n % 2, reset).scheduled()))
            .collect();
        for outcome in futures::future::join_all(deferred).await {
            assert!(outcome.is_ok());
        }

        assert_eq!(token.registered(), 0);
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_tokio_cancel_resolves_deferred() {
        let token = CancellationToken::new();
        let retry = AsyncRetryableLoop::new(io_config(5), TokioScheduler::current())
            .with_cancellation(token.clone());

        let deferred = retry.run(FlakyOperation::always(reset).scheduled());
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), deferred)
            .await
            .expect("cancellation should resolve the deferred result");
        assert!(matches!(result, Err(RetryError::Cancelled { attempts: 1 })));
    }
}

#[cfg(feature = "tracing")]
mod tracing_events {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_exhaustion_is_logged() {
        let (retry, _) = blocking(io_config(2));
        assert_exhausted!(retry.run(FlakyOperation::always(reset).blocking()), 2);

        assert!(logs_contain("attempt failed, retrying"));
        assert!(logs_contain("delay_ms=1000"));
        assert!(logs_contain("retry exhausted"));
    }

    #[test]
    #[traced_test]
    fn test_non_retryable_is_logged() {
        let (retry, _) = blocking(io_config(2));
        let op = FlakyOperation::always(|_| HttpError::timeout(Duration::from_secs(1)));
        assert_not_retryable!(retry.run(op.blocking()));

        assert!(logs_contain("failure is not retryable"));
    }
}
