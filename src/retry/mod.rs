//! Retry loops for fallible calls.
//!
//! This module drives a single logical call through repeated attempts:
//!
//! - **Data first**: [`RetryConfiguration`] is plain data (attempts,
//!   conditions, back-off, budget policy) built once per call site
//! - **Two drivers, one rule**: [`RetryableLoop`] blocks the calling thread
//!   between attempts while [`AsyncRetryableLoop`] hands each attempt to a
//!   [`Scheduler`](crate::Scheduler); both count attempts and report
//!   exhaustion identically. The blocking loop waits `back_off(n)` after
//!   attempt `n`, the scheduled loop `back_off(n + 1)`
//! - **Budgets**: a [`RetryPolicy`] can veto further attempts independently of
//!   the attempt count, per sequence or across all of them
//!
//! # Quick Start
//!
//! ```rust
//! use tidewater::{BackOffPolicy, RetryCondition, RetryConfiguration, RetryError, RetryableLoop};
//! use std::io;
//! use std::time::Duration;
//!
//! let config = RetryConfiguration::new(3)
//!     .retry_on(RetryCondition::error_kind::<io::Error>())
//!     .with_back_off(BackOffPolicy::new(Duration::from_millis(1), 1.0));
//!
//! let result: Result<(), _> =
//!     RetryableLoop::new(config).run(|| Err(io::Error::other("connection reset")));
//!
//! match result {
//!     Err(RetryError::Exhausted(exhausted)) => {
//!         assert_eq!(exhausted.attempts, 3);
//!         assert_eq!(exhausted.final_error.to_string(), "connection reset");
//!     }
//!     other => panic!("unexpected outcome: {:?}", other),
//! }
//! ```
//!
//! # Outcomes
//!
//! - success: the first successful value, no further attempts
//! - [`RetryError::NotRetryable`]: the first failure no condition matched,
//!   unwrapped
//! - [`RetryError::Exhausted`]: the last failure once the attempts or the
//!   budget ran out, with attempt count and elapsed time
//! - [`RetryError::Denied`]: the policy refused before any attempt ran
//! - [`RetryError::Cancelled`]: a [`CancellationToken`](crate::CancellationToken)
//!   stopped the sequence

mod blocking;
mod config;
mod error;
mod policy;
mod scheduled;
mod trace;

pub use blocking::{Retryable, RetryableLoop};
pub use config::{RetryConfiguration, RetryEvent};
pub use error::{RetryError, RetryExhausted};
pub use policy::{AlwaysRetryable, RetryPolicy, SharedAttemptBudget, TimeBudget};
pub use scheduled::{AsyncRetryable, AsyncRetryableLoop, Deferred};

#[cfg(test)]
mod tests;
