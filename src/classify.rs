//! Failure classification at the wire boundary.
//!
//! Handlers report failures with [`HandlerError`]: either an intentional
//! business rejection ([`HandlerError::api`]) or anything else, which is
//! treated as an internal failure. [`classify_handler_error`] and
//! [`classify_panic`] turn those into a [`Classified`] pair: the `local`
//! descriptor keeps every detail for logging, the `wire` descriptor is what
//! the remote peer is allowed to see.

use std::fmt;

use crate::{
    error::{ErrorKind, TsrpcError},
    panic::PanicMessage,
};

/// Message substituted for internal failures before they cross the wire.
pub const REDACTED_MESSAGE: &str = "Internal Server Error";

/// Failure returned by application handlers and flow hooks.
///
/// Any `std::error::Error` converts into an internal, non-shareable
/// `HandlerError`, so handlers can use `?` freely.
///
/// # Examples
///
/// ```
/// use tsrpc::classify::{HandlerError, classify_handler_error};
/// use tsrpc::ErrorKind;
///
/// let rejected = classify_handler_error(HandlerError::api("Invalid token"));
/// assert_eq!(rejected.wire.kind, ErrorKind::ApiError);
/// assert_eq!(rejected.wire.message, "Invalid token");
///
/// let parse_err = "x".parse::<u32>().unwrap_err();
/// let internal = classify_handler_error(HandlerError::from(parse_err));
/// assert_eq!(internal.wire.message, tsrpc::classify::REDACTED_MESSAGE);
/// ```
pub enum HandlerError {
    /// Intentional business rejection; always shareable.
    Api {
        /// Message shown to the remote caller.
        message: String,
        /// Optional structured detail shown to the remote caller.
        info: Option<serde_json::Value>,
    },
    /// Unexpected failure.
    Internal {
        /// Local description.
        message: String,
        /// Whether `message` may be echoed to the remote caller.
        shareable: bool,
        /// Underlying cause, logged locally only.
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl HandlerError {
    /// Business-logic rejection visible to the caller.
    #[must_use]
    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
            info: None,
        }
    }

    /// Business-logic rejection with structured detail.
    #[must_use]
    pub fn api_with_info(message: impl Into<String>, info: serde_json::Value) -> Self {
        Self::Api {
            message: message.into(),
            info: Some(info),
        }
    }

    /// Internal failure whose message stays local.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            shareable: false,
            source: None,
        }
    }

    /// Internal failure explicitly marked safe to echo to the caller.
    #[must_use]
    pub fn shareable(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            shareable: true,
            source: None,
        }
    }
}

impl<E> From<E> for HandlerError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::Internal {
            message: error.to_string(),
            shareable: false,
            source: Some(Box::new(error)),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api { message, .. } => write!(f, "api error: {message}"),
            Self::Internal {
                message,
                source: Some(source),
                ..
            } => write!(f, "internal error: {message} ({source:?})"),
            Self::Internal { message, .. } => write!(f, "internal error: {message}"),
        }
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api { message, info } => f
                .debug_struct("Api")
                .field("message", message)
                .field("info", info)
                .finish(),
            Self::Internal {
                message,
                shareable,
                source,
            } => f
                .debug_struct("Internal")
                .field("message", message)
                .field("shareable", shareable)
                .field("source", source)
                .finish(),
        }
    }
}

/// A failure split into its local and wire-safe renderings.
#[derive(Clone, Debug, PartialEq)]
pub struct Classified {
    /// Full detail for the local log.
    pub local: TsrpcError,
    /// What the remote peer may see.
    pub wire: TsrpcError,
}

/// Classify a handler failure.
#[must_use]
pub fn classify_handler_error(error: HandlerError) -> Classified {
    match error {
        HandlerError::Api { message, info } => {
            let mut err = TsrpcError::api(message);
            err.info = info;
            Classified {
                local: err.clone(),
                wire: err,
            }
        }
        HandlerError::Internal {
            message,
            shareable,
            source,
        } => {
            let local = match source {
                Some(source) => TsrpcError::internal(format!("{message} ({source:?})")),
                None => TsrpcError::internal(message.clone()),
            };
            let wire = if shareable {
                TsrpcError::internal(message)
            } else {
                TsrpcError::internal(REDACTED_MESSAGE)
            };
            Classified { local, wire }
        }
    }
}

/// Classify a panic caught while running a handler.
#[must_use]
pub fn classify_panic(panic: &PanicMessage) -> Classified {
    Classified {
        local: TsrpcError::internal(format!("handler panicked: {panic}")),
        wire: TsrpcError::internal(REDACTED_MESSAGE),
    }
}

/// Classify a transport-level failure, keeping the status code if known.
#[must_use]
pub fn classify_transport(message: impl Into<String>, status_code: Option<u16>) -> TsrpcError {
    let err = TsrpcError::network(message);
    match status_code {
        Some(code) => err.with_info(serde_json::json!({ "statusCode": code })),
        None => err,
    }
}

/// Render an arbitrary local error for the wire.
///
/// `ApiError` passes through untouched; every other kind becomes a generic
/// `InternalError` without detail.
#[must_use]
pub fn redact(error: &TsrpcError) -> TsrpcError {
    if error.kind == ErrorKind::ApiError {
        error.clone()
    } else {
        TsrpcError::internal(REDACTED_MESSAGE)
    }
}
