//! Combining conditions.

use crate::condition::RetryCondition;
use crate::failure::Failure;

/// A set of [`RetryCondition`]s; a failure is retryable if *any* matches.
///
/// An empty matcher retries nothing.
///
/// # Example
///
/// ```rust
/// use tidewater::{HttpError, RetryCondition, RetryConditionMatcher};
///
/// let empty = RetryConditionMatcher::new();
/// assert!(!empty.matches(&HttpError::connect("refused")));
///
/// let matcher = empty.with(RetryCondition::error_kind::<HttpError>());
/// assert!(matcher.matches(&HttpError::connect("refused")));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RetryConditionMatcher {
    conditions: Vec<RetryCondition>,
}

impl RetryConditionMatcher {
    /// Create a matcher with no conditions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition, builder style.
    pub fn with(mut self, condition: RetryCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add a condition.
    pub fn push(&mut self, condition: RetryCondition) {
        self.conditions.push(condition);
    }

    /// Whether `failure` deserves another attempt.
    pub fn matches<E: Failure>(&self, failure: &E) -> bool {
        self.conditions.iter().any(|c| c.matches(failure))
    }

    /// The configured conditions.
    pub fn conditions(&self) -> &[RetryCondition] {
        &self.conditions
    }

    /// Number of configured conditions.
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Returns true if no condition is configured.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

impl FromIterator<RetryCondition> for RetryConditionMatcher {
    fn from_iter<I: IntoIterator<Item = RetryCondition>>(iter: I) -> Self {
        Self {
            conditions: iter.into_iter().collect(),
        }
    }
}

impl Extend<RetryCondition> for RetryConditionMatcher {
    fn extend<I: IntoIterator<Item = RetryCondition>>(&mut self, iter: I) {
        self.conditions.extend(iter);
    }
}
