//! Failure classification: which failures deserve another attempt.
//!
//! A [`RetryCondition`] is one of four kinds of test:
//!
//! - **Error kind**: the failure, or anything in its `source()` chain, is one
//!   of a set of error types
//! - **Status**: the erroneous response has one of a set of status codes, or
//!   any 4xx, or any 5xx
//! - **Header**: the erroneous response carries a header, optionally with an
//!   exact value
//! - **Response**: an arbitrary [`ResponsePredicate`] over the full response
//!
//! Only failures exposing a response (see [`Failure::response`]) can match the
//! last three; a connection-level fault only ever matches by error kind.
//!
//! A [`RetryConditionMatcher`] holds the configured conditions and answers
//! whether *any* of them matches.
//!
//! # Example
//!
//! ```rust
//! use tidewater::{ErrorResponse, HttpError, RetryCondition, RetryConditionMatcher};
//! use http::StatusCode;
//!
//! let matcher = RetryConditionMatcher::new()
//!     .with(RetryCondition::server_errors())
//!     .with(RetryCondition::error_kind::<std::io::Error>());
//!
//! let unavailable = HttpError::status(ErrorResponse::new(StatusCode::SERVICE_UNAVAILABLE));
//! let bad_request = HttpError::status(ErrorResponse::new(StatusCode::BAD_REQUEST));
//!
//! assert!(matcher.matches(&unavailable));
//! assert!(!matcher.matches(&bad_request));
//! ```

mod matcher;
mod predicate;

pub use matcher::RetryConditionMatcher;
pub use predicate::{
    body_contains, has_header, status_is, And, BodyContains, HasHeader, Not, Or,
    ResponsePredicate, ResponsePredicateExt, StatusIs,
};

use std::any::type_name;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use http::{HeaderName, HeaderValue, StatusCode};

use crate::failure::{ErrorResponse, Failure};

/// Maximum number of `source()` links followed when matching error kinds.
pub const MAX_CAUSE_DEPTH: usize = 64;

/// A single retry condition.
#[derive(Clone)]
pub enum RetryCondition {
    /// The failure or one of its causes is one of these kinds.
    ErrorKind(Vec<ErrorKind>),
    /// The response status matches.
    Status(StatusMatch),
    /// The response carries the header, with `value` if one is given.
    Header {
        /// Header to look for.
        name: HeaderName,
        /// Exact value required, if any.
        value: Option<HeaderValue>,
    },
    /// An arbitrary test over the whole response.
    Response(Arc<dyn ResponsePredicate>),
}

/// How a [`RetryCondition::Status`] condition matches status codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusMatch {
    /// One of an explicit set.
    Codes(Vec<StatusCode>),
    /// Any 4xx.
    ClientError,
    /// Any 5xx.
    ServerError,
}

impl StatusMatch {
    /// Check a status code.
    pub fn matches(&self, status: StatusCode) -> bool {
        match self {
            StatusMatch::Codes(codes) => codes.contains(&status),
            StatusMatch::ClientError => status.is_client_error(),
            StatusMatch::ServerError => status.is_server_error(),
        }
    }
}

/// A kind of error, tested against each link of a cause chain.
#[derive(Clone)]
pub struct ErrorKind {
    name: &'static str,
    test: Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>,
}

impl ErrorKind {
    /// Errors of concrete type `T`.
    ///
    /// ```rust
    /// use tidewater::condition::ErrorKind;
    ///
    /// let kind = ErrorKind::of::<std::io::Error>();
    /// let err = std::io::Error::other("boom");
    /// assert!(kind.is(&err));
    /// ```
    pub fn of<T: StdError + 'static>() -> Self {
        Self {
            name: type_name::<T>(),
            test: Arc::new(|err: &(dyn StdError + 'static)| err.is::<T>()),
        }
    }

    /// I/O errors of one [`std::io::ErrorKind`].
    pub fn io(kind: std::io::ErrorKind) -> Self {
        Self {
            name: "std::io::Error",
            test: Arc::new(move |err: &(dyn StdError + 'static)| {
                err.downcast_ref::<std::io::Error>()
                    .is_some_and(|io| io.kind() == kind)
            }),
        }
    }

    /// A custom classification.
    pub fn custom<F>(name: &'static str, test: F) -> Self
    where
        F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
    {
        Self {
            name,
            test: Arc::new(test),
        }
    }

    /// The name this kind was registered under.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Check a single error, without walking its causes.
    pub fn is(&self, err: &(dyn StdError + 'static)) -> bool {
        (self.test)(err)
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorKind").field(&self.name).finish()
    }
}

impl RetryCondition {
    /// Retry when the failure or one of its causes is a `T`.
    pub fn error_kind<T: StdError + 'static>() -> Self {
        Self::ErrorKind(vec![ErrorKind::of::<T>()])
    }

    /// Retry when the failure or one of its causes is any of `kinds`.
    pub fn error_kinds(kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self::ErrorKind(kinds.into_iter().collect())
    }

    /// Retry on an explicit set of statuses.
    pub fn status(codes: impl IntoIterator<Item = StatusCode>) -> Self {
        Self::Status(StatusMatch::Codes(codes.into_iter().collect()))
    }

    /// Retry on any 4xx.
    pub fn client_errors() -> Self {
        Self::Status(StatusMatch::ClientError)
    }

    /// Retry on any 5xx.
    pub fn server_errors() -> Self {
        Self::Status(StatusMatch::ServerError)
    }

    /// Retry when the response carries `name`, whatever its value.
    pub fn header(name: HeaderName) -> Self {
        Self::Header { name, value: None }
    }

    /// Retry when the response carries `name` with exactly `value`.
    pub fn header_value(name: HeaderName, value: HeaderValue) -> Self {
        Self::Header {
            name,
            value: Some(value),
        }
    }

    /// Retry when `predicate` holds for the response.
    pub fn response<P: ResponsePredicate + 'static>(predicate: P) -> Self {
        Self::Response(Arc::new(predicate))
    }

    /// Check whether this condition matches `failure`.
    pub fn matches<E: Failure>(&self, failure: &E) -> bool {
        match self {
            RetryCondition::ErrorKind(kinds) => {
                let root: &(dyn StdError + 'static) = failure;
                causes(root).any(|err| kinds.iter().any(|kind| kind.is(err)))
            }
            _ => failure
                .response()
                .is_some_and(|response| self.matches_response(response)),
        }
    }

    fn matches_response(&self, response: &ErrorResponse) -> bool {
        match self {
            RetryCondition::ErrorKind(_) => false,
            RetryCondition::Status(status) => status.matches(response.status()),
            RetryCondition::Header { name, value } => {
                let mut values = response.headers().get_all(name).iter();
                match value {
                    Some(expected) => values.any(|v| v == expected),
                    None => values.next().is_some(),
                }
            }
            RetryCondition::Response(predicate) => predicate.check(response),
        }
    }
}

impl fmt::Debug for RetryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ErrorKind(kinds) => f.debug_tuple("ErrorKind").field(kinds).finish(),
            Self::Status(status) => f.debug_tuple("Status").field(status).finish(),
            Self::Header { name, value } => f
                .debug_struct("Header")
                .field("name", name)
                .field("value", value)
                .finish(),
            Self::Response(_) => f.write_str("Response(..)"),
        }
    }
}

/// Walk an error and its causes, at most [`MAX_CAUSE_DEPTH`] links deep.
fn causes<'a>(
    root: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    let mut next = Some(root);
    std::iter::from_fn(move || {
        let current = next?;
        next = current.source();
        Some(current)
    })
    .take(MAX_CAUSE_DEPTH + 1)
}
