//! Back-off timing between retry attempts.
//!
//! A [`BackOffPolicy`] is pure data: it maps a 1-based attempt number to the
//! time to wait before the next attempt. The exponential formula is computed
//! by repeated multiplication in whole milliseconds, so existing
//! configurations produce exactly the same delays they always have.
//!
//! # Examples
//!
//! ```rust
//! use tidewater::BackOffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackOffPolicy::new(Duration::from_millis(2000), 1.5);
//!
//! assert_eq!(policy.back_off(1), Duration::from_millis(2000));
//! assert_eq!(policy.back_off(2), Duration::from_millis(3000));
//! assert_eq!(policy.back_off(3), Duration::from_millis(4500));
//! assert_eq!(policy.back_off(4), Duration::from_millis(6750));
//! assert_eq!(policy.back_off(5), Duration::from_millis(10125));
//! ```

use std::time::Duration;

/// Base delay of the default back-off policy.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Multiplier of the default back-off policy (constant delay).
pub const DEFAULT_MULTIPLIER: f64 = 1.0;

/// Whole milliseconds in `delay`, saturating at `u64::MAX`.
pub(crate) fn whole_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Exponential back-off: `base_delay * multiplier^(attempt - 1)`.
///
/// The default policy waits a constant second between attempts.
///
/// # Examples
///
/// ```rust
/// use tidewater::BackOffPolicy;
/// use std::time::Duration;
///
/// let policy = BackOffPolicy::new(Duration::from_millis(1000), 2.0);
///
/// assert_eq!(policy.back_off(1), Duration::from_millis(1000));
/// assert_eq!(policy.back_off(2), Duration::from_millis(2000));
/// assert_eq!(policy.back_off(3), Duration::from_millis(4000));
/// assert_eq!(policy.back_off(4), Duration::from_millis(8000));
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BackOffPolicy {
    base_delay: Duration,
    multiplier: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    max_delay: Option<Duration>,
    #[cfg_attr(feature = "serde", serde(default))]
    jitter: JitterStrategy,
}

/// Strategy for adding randomness to delays.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JitterStrategy {
    /// No jitter applied.
    #[default]
    None,
    /// Add ±percentage randomness to delay.
    Proportional(f64),
    /// Random delay between 0 and calculated delay.
    Full,
}

impl Default for BackOffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MULTIPLIER)
    }
}

impl BackOffPolicy {
    /// Create a policy from a base delay and a multiplier.
    ///
    /// A multiplier of `1.0` yields a constant delay.
    pub fn new(base_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay: None,
            jitter: JitterStrategy::None,
        }
    }

    /// Cap every delay produced by [`delay_for`](Self::delay_for).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tidewater::BackOffPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = BackOffPolicy::new(Duration::from_millis(100), 2.0)
    ///     .with_max_delay(Duration::from_millis(500));
    ///
    /// assert_eq!(policy.delay_for(3), Duration::from_millis(400));
    /// assert_eq!(policy.delay_for(4), Duration::from_millis(500));
    /// // the raw formula is unaffected by the cap
    /// assert_eq!(policy.back_off(4), Duration::from_millis(800));
    /// ```
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Add proportional jitter to delays.
    ///
    /// The factor is clamped to `0.0..=1.0`; `0.25` means ±25%.
    ///
    /// **Note**: Requires the `jitter` feature. Without it, this has no effect
    /// on the computed delays.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = JitterStrategy::Proportional(factor.clamp(0.0, 1.0));
        self
    }

    /// Use full jitter: a random delay between zero and the computed delay.
    ///
    /// **Note**: Requires the `jitter` feature.
    pub fn with_full_jitter(mut self) -> Self {
        self.jitter = JitterStrategy::Full;
        self
    }

    /// Get the base delay.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Get the multiplier.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Get the maximum delay cap.
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// Get the jitter strategy.
    pub fn jitter(&self) -> JitterStrategy {
        self.jitter
    }

    /// The exact back-off for a 1-based attempt.
    ///
    /// Each intermediate product is truncated to whole milliseconds before the
    /// next multiplication. Attempt `0` is treated as attempt `1`. The result
    /// saturates instead of overflowing.
    pub fn back_off(&self, attempt: u32) -> Duration {
        let mut millis = whole_millis(self.base_delay);

        for _ in 1..attempt.max(1) {
            let next = (millis as f64 * self.multiplier) as u64;
            // fixed points: nothing changes on further iterations
            if next == millis || next == u64::MAX || next == 0 {
                millis = next;
                break;
            }
            millis = next;
        }

        Duration::from_millis(millis)
    }

    /// The delay the retry loops actually wait after `attempt` failed.
    ///
    /// This is [`back_off`](Self::back_off) with the optional cap and jitter
    /// applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.back_off(attempt);
        let capped = self.cap(base);
        self.cap(self.jitter.apply(capped))
    }

    /// Validate that the policy produces meaningful delays.
    ///
    /// Returns an error message if the multiplier is not a finite, positive
    /// number.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            Err("BackOffPolicy multiplier must be a finite number greater than zero")
        } else {
            Ok(())
        }
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl JitterStrategy {
    /// Apply jitter to a delay.
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterStrategy::None => delay,
            #[cfg(feature = "jitter")]
            JitterStrategy::Proportional(factor) => {
                use rand::Rng;
                let millis = delay.as_millis() as f64;
                let range = millis * factor;
                let min = (millis - range).max(0.0);
                let max = millis + range;
                if max <= min {
                    return delay;
                }
                Duration::from_millis(rand::rng().random_range(min..=max) as u64)
            }
            #[cfg(not(feature = "jitter"))]
            JitterStrategy::Proportional(_) => delay,
            #[cfg(feature = "jitter")]
            JitterStrategy::Full => {
                use rand::Rng;
                let max = whole_millis(delay);
                if max == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rand::rng().random_range(0..=max))
                }
            }
            #[cfg(not(feature = "jitter"))]
            JitterStrategy::Full => delay,
        }
    }
}
