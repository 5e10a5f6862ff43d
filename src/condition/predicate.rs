//! Composable predicates over erroneous responses.
//!
//! These back the escape-hatch [`RetryCondition::response`] condition: anything
//! the status and header conditions cannot express on their own, such as
//! "503 *and* a `Retry-After` header".
//!
//! [`RetryCondition::response`]: crate::RetryCondition::response

use http::{HeaderName, StatusCode};

use crate::failure::ErrorResponse;

/// A predicate over an [`ErrorResponse`].
///
/// Predicates combine with `and`, `or` and `not`:
///
/// ```rust
/// use tidewater::condition::{body_contains, status_is, ResponsePredicate, ResponsePredicateExt};
/// use tidewater::ErrorResponse;
/// use http::StatusCode;
///
/// let throttled = status_is(StatusCode::FORBIDDEN).and(body_contains("rate limit"));
///
/// let response = ErrorResponse::new(StatusCode::FORBIDDEN).with_body("rate limit exceeded");
/// assert!(throttled.check(&response));
/// assert!(!throttled.check(&ErrorResponse::new(StatusCode::FORBIDDEN)));
/// ```
pub trait ResponsePredicate: Send + Sync {
    /// Check if the response satisfies this predicate.
    fn check(&self, response: &ErrorResponse) -> bool;
}

impl<F> ResponsePredicate for F
where
    F: Fn(&ErrorResponse) -> bool + Send + Sync,
{
    #[inline]
    fn check(&self, response: &ErrorResponse) -> bool {
        self(response)
    }
}

/// Extension trait for predicate combinators.
pub trait ResponsePredicateExt: ResponsePredicate + Sized {
    /// Both predicates must hold.
    fn and<P: ResponsePredicate>(self, other: P) -> And<Self, P> {
        And(self, other)
    }

    /// Either predicate must hold.
    fn or<P: ResponsePredicate>(self, other: P) -> Or<Self, P> {
        Or(self, other)
    }

    /// Invert the predicate.
    fn not(self) -> Not<Self> {
        Not(self)
    }
}

impl<P: ResponsePredicate> ResponsePredicateExt for P {}

/// AND combinator - both predicates must be true.
#[derive(Clone, Copy, Debug)]
pub struct And<P1, P2>(pub P1, pub P2);

impl<P1: ResponsePredicate, P2: ResponsePredicate> ResponsePredicate for And<P1, P2> {
    #[inline]
    fn check(&self, response: &ErrorResponse) -> bool {
        self.0.check(response) && self.1.check(response)
    }
}

/// OR combinator - either predicate must be true.
#[derive(Clone, Copy, Debug)]
pub struct Or<P1, P2>(pub P1, pub P2);

impl<P1: ResponsePredicate, P2: ResponsePredicate> ResponsePredicate for Or<P1, P2> {
    #[inline]
    fn check(&self, response: &ErrorResponse) -> bool {
        self.0.check(response) || self.1.check(response)
    }
}

/// NOT combinator - inverts the predicate.
#[derive(Clone, Copy, Debug)]
pub struct Not<P>(pub P);

impl<P: ResponsePredicate> ResponsePredicate for Not<P> {
    #[inline]
    fn check(&self, response: &ErrorResponse) -> bool {
        !self.0.check(response)
    }
}

/// Status equals the given code.
#[derive(Clone, Copy, Debug)]
pub struct StatusIs(StatusCode);

impl ResponsePredicate for StatusIs {
    fn check(&self, response: &ErrorResponse) -> bool {
        response.status() == self.0
    }
}

/// Create a predicate matching one exact status.
pub fn status_is(status: StatusCode) -> StatusIs {
    StatusIs(status)
}

/// Header is present, whatever its value.
#[derive(Clone, Debug)]
pub struct HasHeader(HeaderName);

impl ResponsePredicate for HasHeader {
    fn check(&self, response: &ErrorResponse) -> bool {
        response.headers().contains_key(&self.0)
    }
}

/// Create a predicate matching responses that carry `name`.
pub fn has_header(name: HeaderName) -> HasHeader {
    HasHeader(name)
}

/// Body contains a byte sequence.
#[derive(Clone, Debug)]
pub struct BodyContains(Vec<u8>);

impl ResponsePredicate for BodyContains {
    fn check(&self, response: &ErrorResponse) -> bool {
        let needle = self.0.as_slice();
        needle.is_empty() || response.body().windows(needle.len()).any(|w| w == needle)
    }
}

/// Create a predicate matching bodies containing `needle`.
pub fn body_contains(needle: impl Into<Vec<u8>>) -> BodyContains {
    BodyContains(needle.into())
}
