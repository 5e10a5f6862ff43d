//! Failures produced by a single request attempt.
//!
//! The retry engine only needs two things from a failure: its place in a
//! `std::error::Error` cause chain, and, when the request got as far as a
//! response, the response itself. [`Failure`] captures exactly that.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

/// A failure the retry loops can classify.
///
/// Failures that represent a completed-but-erroneous response return it from
/// [`response`](Failure::response); connection-level faults keep the default
/// `None` and can then only be matched by error type.
///
/// # Examples
///
/// ```rust
/// use tidewater::{ErrorResponse, Failure, HttpError};
/// use http::StatusCode;
///
/// let err = HttpError::status(ErrorResponse::new(StatusCode::BAD_GATEWAY));
/// assert_eq!(err.response().map(|r| r.status()), Some(StatusCode::BAD_GATEWAY));
///
/// let err = HttpError::connect("connection refused");
/// assert!(err.response().is_none());
/// ```
pub trait Failure: StdError + Send + Sync + 'static {
    /// The erroneous response carried by this failure, if any.
    fn response(&self) -> Option<&ErrorResponse> {
        None
    }
}

impl Failure for std::io::Error {}

/// A completed HTTP response that the caller treats as an error.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl ErrorResponse {
    /// Create a response with the given status, no headers and no body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }

    /// Append a header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replace the header map.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// The response status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The raw response body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Errors a request attempt can end with.
#[derive(Debug)]
pub enum HttpError {
    /// The request never produced a response.
    Connect {
        /// Description of the fault.
        message: String,
        /// The underlying transport error.
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
    /// The attempt exceeded its own time limit.
    Timeout(Duration),
    /// The server answered with an erroneous response.
    Status(ErrorResponse),
}

impl HttpError {
    /// A connection-level fault without an underlying error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
            source: None,
        }
    }

    /// A connection-level fault caused by `source`.
    pub fn connect_with<S>(message: impl Into<String>, source: S) -> Self
    where
        S: StdError + Send + Sync + 'static,
    {
        Self::Connect {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// An attempt that timed out.
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout(after)
    }

    /// An erroneous response.
    pub fn status(response: ErrorResponse) -> Self {
        Self::Status(response)
    }

    /// Returns true if this failure carries a response.
    pub fn is_status(&self) -> bool {
        matches!(self, Self::Status(_))
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { message, .. } => write!(f, "connection failed: {}", message),
            Self::Timeout(after) => write!(f, "request timed out after {:?}", after),
            Self::Status(response) => write!(f, "server responded with {}", response.status()),
        }
    }
}

impl StdError for HttpError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connect {
                source: Some(source),
                ..
            } => Some(&**source),
            _ => None,
        }
    }
}

impl Failure for HttpError {
    fn response(&self) -> Option<&ErrorResponse> {
        match self {
            Self::Status(response) => Some(response),
            _ => None,
        }
    }
}

impl From<ErrorResponse> for HttpError {
    fn from(response: ErrorResponse) -> Self {
        Self::Status(response)
    }
}

impl From<std::io::Error> for HttpError {
    fn from(err: std::io::Error) -> Self {
        Self::connect_with(err.to_string(), err)
    }
}
