//! The resolved retry configuration for one call site.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::BackOffPolicy;
use crate::condition::{RetryCondition, RetryConditionMatcher};
use crate::retry::policy::{AlwaysRetryable, RetryPolicy};

/// Information about a failed attempt that is about to be retried, passed to
/// hooks.
#[derive(Debug, Clone)]
pub struct RetryEvent<'a> {
    /// Which attempt just failed (1-indexed).
    pub attempt: u32,
    /// The error from the failed attempt.
    pub error: &'a (dyn StdError + 'static),
    /// Delay before the next attempt.
    pub next_delay: Duration,
    /// Total elapsed time since the first attempt.
    pub elapsed: Duration,
}

type RetryHook = Arc<dyn Fn(&RetryEvent<'_>) + Send + Sync>;

/// Everything a retry loop needs: attempt count, conditions, back-off and
/// budget policy.
///
/// Built once per call site and immutable afterwards; share it behind an
/// `Arc` or clone it (clones share the policy and hook).
///
/// # Example
///
/// ```rust
/// use tidewater::{BackOffPolicy, RetryCondition, RetryConfiguration};
/// use std::time::Duration;
///
/// let config = RetryConfiguration::new(5)
///     .retry_on(RetryCondition::server_errors())
///     .retry_on(RetryCondition::error_kind::<std::io::Error>())
///     .with_back_off(BackOffPolicy::new(Duration::from_millis(200), 2.0));
///
/// assert_eq!(config.attempts(), 5);
/// assert_eq!(config.conditions().len(), 2);
/// assert_eq!(config.back_off().back_off(3), Duration::from_millis(800));
/// ```
#[derive(Clone)]
pub struct RetryConfiguration {
    attempts: u32,
    conditions: RetryConditionMatcher,
    back_off: BackOffPolicy,
    policy: Arc<dyn RetryPolicy>,
    on_retry: Option<RetryHook>,
}

impl RetryConfiguration {
    /// A configuration allowing `attempts` attempts, with no conditions, the
    /// default back-off and the always-retryable policy.
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            conditions: RetryConditionMatcher::new(),
            back_off: BackOffPolicy::default(),
            policy: Arc::new(AlwaysRetryable),
            on_retry: None,
        }
    }

    /// Add a retry condition.
    pub fn retry_on(mut self, condition: RetryCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Replace all conditions.
    pub fn with_conditions(mut self, conditions: RetryConditionMatcher) -> Self {
        self.conditions = conditions;
        self
    }

    /// Set the back-off policy.
    pub fn with_back_off(mut self, back_off: BackOffPolicy) -> Self {
        self.back_off = back_off;
        self
    }

    /// Set the budget policy.
    pub fn with_policy<P: RetryPolicy + 'static>(mut self, policy: P) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Set a shared budget policy.
    pub fn with_shared_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Call `hook` before every back-off wait.
    ///
    /// The hook runs on whichever thread observed the failure and should not
    /// block; use it for logging or metrics.
    pub fn on_retry<H>(mut self, hook: H) -> Self
    where
        H: Fn(&RetryEvent<'_>) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Maximum number of attempts.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The configured conditions.
    pub fn conditions(&self) -> &RetryConditionMatcher {
        &self.conditions
    }

    /// The back-off policy.
    pub fn back_off(&self) -> &BackOffPolicy {
        &self.back_off
    }

    /// The budget policy.
    pub fn policy(&self) -> &dyn RetryPolicy {
        self.policy.as_ref()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.attempts == 0 {
            return Err("RetryConfiguration must allow at least one attempt");
        }
        self.back_off.validate()
    }

    pub(crate) fn notify(&self, event: &RetryEvent<'_>) {
        if let Some(hook) = &self.on_retry {
            hook(event);
        }
    }
}

impl Default for RetryConfiguration {
    fn default() -> Self {
        Self::new(1)
    }
}

impl fmt::Debug for RetryConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfiguration")
            .field("attempts", &self.attempts)
            .field("conditions", &self.conditions)
            .field("back_off", &self.back_off)
            .field("policy", &self.policy)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}
