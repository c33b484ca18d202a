//! Canonical error and result types for the crate.
//!
//! Every fallible public operation returns an [`OpResult`]. Failures are
//! plain data: a [`TsrpcError`] carries an [`ErrorKind`], a human-readable
//! message and optional structured detail. The kind decides how much of the
//! error may cross the wire (see [`crate::classify`]).

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

/// Success-or-failure result returned by every protocol operation.
pub type OpResult<T> = Result<T, TsrpcError>;

/// Category of a [`TsrpcError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Business-logic rejection raised intentionally by a handler.
    ApiError,
    /// Uncaught failure inside a handler, hook or the engine itself.
    InternalError,
    /// Transport-level failure.
    NetworkError,
    /// A request did not receive its response in time.
    TimeoutError,
    /// An inbound payload could not be decoded into an envelope.
    DecodeError,
    /// The connection closed while the operation was outstanding.
    ConnectionClosed,
    /// The caller cancelled the operation.
    Cancelled,
}

impl ErrorKind {
    /// Stable name used on the wire and in metrics labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ApiError => "ApiError",
            Self::InternalError => "InternalError",
            Self::NetworkError => "NetworkError",
            Self::TimeoutError => "TimeoutError",
            Self::DecodeError => "DecodeError",
            Self::ConnectionClosed => "ConnectionClosed",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Returned when parsing an unrecognised [`ErrorKind`] name.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown error kind: {0}")]
pub struct UnknownErrorKind(pub String);

impl FromStr for ErrorKind {
    type Err = UnknownErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ApiError" => Ok(Self::ApiError),
            "InternalError" => Ok(Self::InternalError),
            "NetworkError" => Ok(Self::NetworkError),
            "TimeoutError" => Ok(Self::TimeoutError),
            "DecodeError" => Ok(Self::DecodeError),
            "ConnectionClosed" => Ok(Self::ConnectionClosed),
            "Cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownErrorKind(other.to_owned())),
        }
    }
}

/// Typed error descriptor produced by every failure path.
///
/// # Examples
///
/// ```
/// use tsrpc::{ErrorKind, TsrpcError};
///
/// let err = TsrpcError::api("Invalid username");
/// assert_eq!(err.kind, ErrorKind::ApiError);
/// assert_eq!(err.to_string(), "ApiError: Invalid username");
/// ```
#[derive(Clone, Debug, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct TsrpcError {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<serde_json::Value>,
}

impl TsrpcError {
    /// Construct an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            info: None,
        }
    }

    /// Business-logic rejection.
    #[must_use]
    pub fn api(message: impl Into<String>) -> Self { Self::new(ErrorKind::ApiError, message) }

    /// Unexpected internal failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    /// Transport failure.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NetworkError, message)
    }

    /// Request timeout after `after`.
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        let millis = u64::try_from(after.as_millis()).unwrap_or(u64::MAX);
        Self::new(ErrorKind::TimeoutError, "Request timeout")
            .with_info(serde_json::json!({ "timeoutMs": millis }))
    }

    /// Malformed inbound payload.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self { Self::new(ErrorKind::DecodeError, message) }

    /// The connection closed before the operation completed.
    #[must_use]
    pub fn connection_closed(reason: Option<&str>) -> Self {
        let err = Self::new(ErrorKind::ConnectionClosed, "Connection closed");
        match reason {
            Some(reason) => err.with_info(serde_json::json!({ "reason": reason })),
            None => err,
        }
    }

    /// The caller cancelled the operation.
    #[must_use]
    pub fn cancelled() -> Self { Self::new(ErrorKind::Cancelled, "Request cancelled") }

    /// Attach structured detail.
    #[must_use]
    pub fn with_info(mut self, info: serde_json::Value) -> Self {
        self.info = Some(info);
        self
    }

    /// Returns `true` when the error has the given kind.
    #[must_use]
    pub fn is(&self, kind: ErrorKind) -> bool { self.kind == kind }
}
