//! Error types for retry operations.

use std::time::Duration;

/// Error returned when all retry attempts are exhausted.
///
/// Contains the final error along with metadata about the retry sequence.
///
/// # Examples
///
/// ```rust
/// use tidewater::{BackOffPolicy, HttpError, RetryCondition, RetryConfiguration, RetryError, RetryableLoop};
/// use std::time::Duration;
///
/// let config = RetryConfiguration::new(3)
///     .retry_on(RetryCondition::error_kind::<HttpError>())
///     .with_back_off(BackOffPolicy::new(Duration::from_millis(1), 1.0));
///
/// let result: Result<(), _> = RetryableLoop::new(config).run(|| Err(HttpError::connect("refused")));
///
/// match result {
///     Err(RetryError::Exhausted(exhausted)) => {
///         assert_eq!(exhausted.attempts, 3);
///         assert_eq!(exhausted.final_error.to_string(), "connection failed: refused");
///     }
///     other => panic!("Expected exhaustion, got {:?}", other),
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryExhausted<E> {
    /// The error from the final attempt.
    pub final_error: E,
    /// Total number of attempts made.
    pub attempts: u32,
    /// Total time spent retrying.
    pub total_duration: Duration,
}

impl<E> RetryExhausted<E> {
    /// Create a new RetryExhausted error.
    pub fn new(final_error: E, attempts: u32, total_duration: Duration) -> Self {
        Self {
            final_error,
            attempts,
            total_duration,
        }
    }

    /// Extract the final error, discarding metadata.
    pub fn into_error(self) -> E {
        self.final_error
    }

    /// Get a reference to the final error.
    pub fn error(&self) -> &E {
        &self.final_error
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryExhausted<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "retry exhausted after {} attempts ({:?}): {}",
            self.attempts, self.total_duration, self.final_error
        )
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryExhausted<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.final_error)
    }
}

/// How a retry sequence ended without a value.
///
/// Both the blocking and the asynchronous loop report through this one type:
/// an exhausted sequence is always wrapped in [`RetryExhausted`], and a
/// failure no condition matched is handed back untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// A failure no retry condition matched. No further attempt was made.
    NotRetryable(E),
    /// Attempts or policy budget ran out; carries the last failure.
    Exhausted(RetryExhausted<E>),
    /// The policy refused the first attempt, so no failure was recorded.
    Denied {
        /// Attempts made (always zero).
        attempts: u32,
    },
    /// The sequence was abandoned through its cancellation token.
    Cancelled {
        /// Attempts started before cancellation.
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// The last underlying failure, if one was recorded.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::NotRetryable(e) => Some(e),
            Self::Exhausted(exhausted) => Some(exhausted.error()),
            Self::Denied { .. } | Self::Cancelled { .. } => None,
        }
    }

    /// Unwrap the last underlying failure, if one was recorded.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::NotRetryable(e) => Some(e),
            Self::Exhausted(exhausted) => Some(exhausted.into_error()),
            Self::Denied { .. } | Self::Cancelled { .. } => None,
        }
    }

    /// Number of attempts made before the sequence ended.
    ///
    /// `None` for [`NotRetryable`](Self::NotRetryable), which does not track
    /// attempts.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::NotRetryable(_) => None,
            Self::Exhausted(exhausted) => Some(exhausted.attempts),
            Self::Denied { attempts } | Self::Cancelled { attempts } => Some(*attempts),
        }
    }

    /// Returns true if the sequence ran out of attempts or budget.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted(_) | Self::Denied { .. })
    }

    /// Returns true if the failure was not retryable.
    pub fn is_not_retryable(&self) -> bool {
        matches!(self, Self::NotRetryable(_))
    }

    /// Returns true if the sequence was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotRetryable(e) => write!(f, "{}", e),
            Self::Exhausted(exhausted) => write!(f, "{}", exhausted),
            Self::Denied { attempts } => write!(
                f,
                "retry exhausted with {} attempts, no failure recorded",
                attempts
            ),
            Self::Cancelled { attempts } => {
                write!(f, "retry cancelled after {} attempts", attempts)
            }
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NotRetryable(e) => e.source(),
            Self::Exhausted(exhausted) => Some(exhausted),
            Self::Denied { .. } | Self::Cancelled { .. } => None,
        }
    }
}

impl<E> From<RetryExhausted<E>> for RetryError<E> {
    fn from(exhausted: RetryExhausted<E>) -> Self {
        Self::Exhausted(exhausted)
    }
}
