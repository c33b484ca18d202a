//! Error types for the codec layer.
//!
//! [`DecodeError`] distinguishes the ways an inbound payload can fail to
//! become an [`crate::Envelope`]; all of them are recoverable at the
//! connection level (the payload is dropped). [`EncodeError`] covers
//! outbound envelopes that cannot be represented.

use thiserror::Error;

use crate::error::TsrpcError;

/// Failure to decode an inbound payload.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The `type` discriminator is not one of the known envelope kinds.
    #[error("unknown envelope type: {0}")]
    UnknownType(String),

    /// A field required by the envelope kind is absent.
    #[error("missing field `{field}` in {kind} envelope")]
    MissingField {
        /// Envelope kind being decoded.
        kind: &'static str,
        /// Name of the absent field.
        field: &'static str,
    },

    /// A field is present but has the wrong type or an out-of-range value.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The payload ended before the envelope was complete.
    #[error("truncated payload: {0}")]
    Truncated(String),

    /// The payload, or a length it declares, exceeds the envelope size cap.
    #[error("envelope exceeds {limit} bytes")]
    TooLarge {
        /// Cap in bytes.
        limit: usize,
    },

    /// The payload is not a well-formed document in the codec's format.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Failure to encode an outbound envelope.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// The envelope violates a protocol invariant.
    #[error("invalid {kind} envelope: {reason}")]
    Invalid {
        /// Envelope kind being encoded.
        kind: &'static str,
        /// Violated invariant.
        reason: String,
    },

    /// The serializer rejected the envelope.
    #[error("failed to encode {kind} envelope: {reason}")]
    Serialize {
        /// Envelope kind being encoded.
        kind: &'static str,
        /// Serializer message.
        reason: String,
    },
}

impl From<DecodeError> for TsrpcError {
    fn from(error: DecodeError) -> Self { Self::decode(error.to_string()) }
}

impl From<EncodeError> for TsrpcError {
    fn from(error: EncodeError) -> Self { Self::internal(error.to_string()) }
}
