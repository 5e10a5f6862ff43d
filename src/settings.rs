//! Declarative retry settings.
//!
//! [`RetrySettings`] is the plain-data form of a [`RetryConfiguration`]: only
//! numbers, strings and switches, so it can live in a configuration file. With
//! the `serde` feature it can be deserialized, and every field has a default.
//!
//! ```rust
//! use tidewater::settings::{HeaderRule, RetrySettings};
//! use std::time::Duration;
//!
//! let settings = RetrySettings {
//!     attempts: 4,
//!     base_delay_ms: 250,
//!     multiplier: 2.0,
//!     retry_on_status: vec![429],
//!     retry_on_server_errors: true,
//!     retry_on_headers: vec![HeaderRule::present("retry-after")],
//!     ..RetrySettings::default()
//! };
//!
//! let config = settings.into_configuration().unwrap();
//! assert_eq!(config.attempts(), 4);
//! assert_eq!(config.conditions().len(), 3);
//! assert_eq!(config.back_off().back_off(3), Duration::from_millis(1000));
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use http::{HeaderName, HeaderValue, StatusCode};

use crate::backoff::{whole_millis, BackOffPolicy, JitterStrategy, DEFAULT_BASE_DELAY, DEFAULT_MULTIPLIER};
use crate::condition::{ErrorKind, RetryCondition, RetryConditionMatcher};
use crate::failure::HttpError;
use crate::retry::RetryConfiguration;

/// Retry settings as plain data.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetrySettings {
    /// Maximum number of attempts, including the first.
    pub attempts: u32,
    /// Delay after the first failed attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Growth factor applied to each subsequent delay.
    pub multiplier: f64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: Option<u64>,
    /// Randomization applied on top of the computed delay.
    pub jitter: JitterStrategy,
    /// Retry responses with one of these status codes.
    pub retry_on_status: Vec<u16>,
    /// Retry any 4xx response.
    pub retry_on_client_errors: bool,
    /// Retry any 5xx response.
    pub retry_on_server_errors: bool,
    /// Retry responses carrying one of these headers.
    pub retry_on_headers: Vec<HeaderRule>,
    /// Retry I/O errors anywhere in the cause chain.
    pub retry_on_io_errors: bool,
    /// Retry connection faults and timeouts.
    pub retry_on_transport_errors: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: 1,
            base_delay_ms: whole_millis(DEFAULT_BASE_DELAY),
            multiplier: DEFAULT_MULTIPLIER,
            max_delay_ms: None,
            jitter: JitterStrategy::None,
            retry_on_status: Vec::new(),
            retry_on_client_errors: false,
            retry_on_server_errors: false,
            retry_on_headers: Vec::new(),
            retry_on_io_errors: false,
            retry_on_transport_errors: false,
        }
    }
}

/// A header that makes a response retryable.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeaderRule {
    /// Header name, case-insensitive.
    pub name: String,
    /// Exact value required, if any.
    #[cfg_attr(feature = "serde", serde(default))]
    pub value: Option<String>,
}

impl HeaderRule {
    /// Match any response carrying `name`.
    pub fn present(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Match responses where `name` equals `value`.
    pub fn equals(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    fn to_condition(&self) -> Result<RetryCondition, SettingsError> {
        let name = HeaderName::from_bytes(self.name.as_bytes())
            .map_err(|_| SettingsError::InvalidHeaderName(self.name.clone()))?;
        match &self.value {
            None => Ok(RetryCondition::header(name)),
            Some(value) => {
                let value =
                    HeaderValue::from_str(value).map_err(|_| SettingsError::InvalidHeaderValue {
                        name: self.name.clone(),
                        value: value.clone(),
                    })?;
                Ok(RetryCondition::header_value(name, value))
            }
        }
    }
}

/// Why settings could not be turned into a configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsError {
    /// `attempts` was zero.
    ZeroAttempts,
    /// The multiplier was not a finite positive number.
    InvalidMultiplier(f64),
    /// A status code outside `100..=999`.
    InvalidStatus(u16),
    /// A header name that is not a valid HTTP token.
    InvalidHeaderName(String),
    /// A header value with forbidden characters.
    InvalidHeaderValue {
        /// The header the value belongs to.
        name: String,
        /// The rejected value.
        value: String,
    },
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroAttempts => write!(f, "retry settings must allow at least one attempt"),
            Self::InvalidMultiplier(multiplier) => {
                write!(f, "back-off multiplier must be finite and positive, got {}", multiplier)
            }
            Self::InvalidStatus(code) => write!(f, "invalid status code: {}", code),
            Self::InvalidHeaderName(name) => write!(f, "invalid header name: {:?}", name),
            Self::InvalidHeaderValue { name, value } => {
                write!(f, "invalid value {:?} for header {:?}", value, name)
            }
        }
    }
}

impl StdError for SettingsError {}

impl RetrySettings {
    /// Validate the settings and build a configuration from them.
    ///
    /// Conditions are added in a fixed order: status codes, 4xx, 5xx,
    /// headers, I/O errors, transport errors.
    pub fn into_configuration(self) -> Result<RetryConfiguration, SettingsError> {
        if self.attempts == 0 {
            return Err(SettingsError::ZeroAttempts);
        }

        let mut back_off =
            BackOffPolicy::new(Duration::from_millis(self.base_delay_ms), self.multiplier);
        if back_off.validate().is_err() {
            return Err(SettingsError::InvalidMultiplier(self.multiplier));
        }
        if let Some(max) = self.max_delay_ms {
            back_off = back_off.with_max_delay(Duration::from_millis(max));
        }
        back_off = match self.jitter {
            JitterStrategy::None => back_off,
            JitterStrategy::Proportional(factor) => back_off.with_jitter(factor),
            JitterStrategy::Full => back_off.with_full_jitter(),
        };

        Ok(RetryConfiguration::new(self.attempts)
            .with_back_off(back_off)
            .with_conditions(self.conditions()?))
    }

    fn conditions(&self) -> Result<RetryConditionMatcher, SettingsError> {
        let mut conditions = RetryConditionMatcher::new();

        if !self.retry_on_status.is_empty() {
            let codes = self
                .retry_on_status
                .iter()
                .map(|&code| StatusCode::from_u16(code).map_err(|_| SettingsError::InvalidStatus(code)))
                .collect::<Result<Vec<_>, _>>()?;
            conditions.push(RetryCondition::status(codes));
        }
        if self.retry_on_client_errors {
            conditions.push(RetryCondition::client_errors());
        }
        if self.retry_on_server_errors {
            conditions.push(RetryCondition::server_errors());
        }
        for rule in &self.retry_on_headers {
            conditions.push(rule.to_condition()?);
        }
        if self.retry_on_io_errors {
            conditions.push(RetryCondition::error_kind::<std::io::Error>());
        }
        if self.retry_on_transport_errors {
            conditions.push(RetryCondition::error_kinds([ErrorKind::custom(
                "transport",
                |err: &(dyn StdError + 'static)| {
                    err.downcast_ref::<HttpError>()
                        .is_some_and(|err| !err.is_status())
                },
            )]));
        }

        Ok(conditions)
    }
}

impl TryFrom<RetrySettings> for RetryConfiguration {
    type Error = SettingsError;

    fn try_from(settings: RetrySettings) -> Result<Self, Self::Error> {
        settings.into_configuration()
    }
}
