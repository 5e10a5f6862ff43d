//! # Tidewater
//!
//! > *"The tide comes back"*
//!
//! Retry machinery for declarative HTTP clients.
//!
//! ## Philosophy
//!
//! **Tidewater** keeps retry behavior as data and the loops that act on it
//! small:
//! - **Data** = [`RetryConfiguration`] (attempts, [`RetryCondition`]s,
//!   [`BackOffPolicy`], [`RetryPolicy`]) resolved once per call site
//! - **Loops** = [`RetryableLoop`] blocks between attempts, while
//!   [`AsyncRetryableLoop`] schedules every attempt on a [`Scheduler`] and
//!   never holds a thread while waiting
//!
//! ## Quick Example
//!
//! ```rust
//! use tidewater::{
//!     BackOffPolicy, ErrorResponse, HttpError, RetryCondition, RetryConfiguration, RetryError,
//!     RetryableLoop,
//! };
//! use http::StatusCode;
//! use std::time::Duration;
//!
//! let config = RetryConfiguration::new(3)
//!     .retry_on(RetryCondition::status([StatusCode::SERVICE_UNAVAILABLE]))
//!     .retry_on(RetryCondition::error_kind::<std::io::Error>())
//!     .with_back_off(BackOffPolicy::new(Duration::from_millis(1), 2.0));
//!
//! // 404 is not retryable: exactly one call, failure handed back as is
//! let mut calls = 0;
//! let result: Result<(), _> = RetryableLoop::new(config).run(|| {
//!     calls += 1;
//!     Err(HttpError::status(ErrorResponse::new(StatusCode::NOT_FOUND)))
//! });
//!
//! match result {
//!     Err(RetryError::NotRetryable(err)) => assert!(err.is_status()),
//!     other => panic!("unexpected outcome: {:?}", other),
//! }
//! assert_eq!(calls, 1);
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod backoff;
pub mod cancel;
pub mod condition;
pub mod failure;
pub mod retry;
pub mod scheduler;
pub mod settings;
pub mod testing;

// Re-exports
pub use backoff::{BackOffPolicy, JitterStrategy};
pub use cancel::CancellationToken;
pub use condition::{RetryCondition, RetryConditionMatcher};
pub use failure::{ErrorResponse, Failure, HttpError};
pub use retry::{
    AlwaysRetryable, AsyncRetryable, AsyncRetryableLoop, Deferred, RetryConfiguration, RetryError,
    RetryEvent, RetryExhausted, RetryPolicy, Retryable, RetryableLoop, SharedAttemptBudget,
    TimeBudget,
};
pub use scheduler::{ScheduledTask, Scheduler};
#[cfg(feature = "async")]
pub use scheduler::TokioScheduler;
pub use settings::{RetrySettings, SettingsError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backoff::BackOffPolicy;
    pub use crate::cancel::CancellationToken;
    pub use crate::condition::{RetryCondition, RetryConditionMatcher};
    pub use crate::failure::{ErrorResponse, Failure, HttpError};
    pub use crate::retry::{
        AsyncRetryableLoop, RetryConfiguration, RetryError, RetryExhausted, RetryPolicy,
        RetryableLoop,
    };
    pub use crate::scheduler::Scheduler;
    #[cfg(feature = "async")]
    pub use crate::scheduler::TokioScheduler;
}
