//! Structured events emitted by the retry loops.
//!
//! Every function compiles to nothing unless the `tracing` feature is on.

#![cfg_attr(not(feature = "tracing"), allow(unused_variables))]

use std::error::Error as StdError;
use std::time::Duration;

pub(crate) fn retrying(mode: &'static str, attempt: u32, delay: Duration, error: &dyn StdError) {
    #[cfg(feature = "tracing")]
    tracing::debug!(
        mode,
        attempt,
        delay_ms = crate::backoff::whole_millis(delay),
        error = %error,
        "attempt failed, retrying"
    );
}

pub(crate) fn not_retryable(mode: &'static str, attempt: u32, error: &dyn StdError) {
    #[cfg(feature = "tracing")]
    tracing::debug!(mode, attempt, error = %error, "failure is not retryable");
}

pub(crate) fn exhausted(mode: &'static str, attempts: u32, error: &dyn StdError) {
    #[cfg(feature = "tracing")]
    tracing::warn!(mode, attempts, error = %error, "retry exhausted");
}

pub(crate) fn denied(mode: &'static str) {
    #[cfg(feature = "tracing")]
    tracing::warn!(mode, "retry policy refused the first attempt");
}

pub(crate) fn cancelled(mode: &'static str, attempts: u32) {
    #[cfg(feature = "tracing")]
    tracing::debug!(mode, attempts, "retry cancelled");
}
