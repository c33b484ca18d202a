//! Pluggable envelope codecs.
//!
//! A codec turns an [`Envelope`] into a transport [`Payload`] and back. The
//! rest of the engine only ever sees decoded envelopes, so swapping
//! [`JsonCodec`] (human-readable) for [`BinaryCodec`] (compact) changes the
//! wire format without touching correlation, dispatch or flows.
//!
//! Decoding never panics: unknown discriminators, missing fields and
//! out-of-range numbers are reported as [`DecodeError`] so the connection can
//! log and drop the payload.

use std::sync::Arc;

use crate::envelope::{Envelope, Payload};

pub mod binary;
pub mod error;
pub mod json;

pub use binary::BinaryCodec;
pub use error::{DecodeError, EncodeError};
pub use json::JsonCodec;

/// Converts envelopes to and from transport payloads.
pub trait EnvelopeCodec: Send + Sync + 'static {
    /// Encode `envelope` for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the envelope violates an invariant (for
    /// example an empty API name) or cannot be represented.
    fn encode(&self, envelope: &Envelope) -> Result<Payload, EncodeError>;

    /// Decode an inbound payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] for unrecognised or incomplete envelopes.
    fn decode(&self, payload: &Payload) -> Result<Envelope, DecodeError>;
}

/// Built-in codec selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CodecKind {
    /// [`JsonCodec`].
    #[default]
    Json,
    /// [`BinaryCodec`].
    Binary,
}

impl CodecKind {
    /// Instantiate the selected codec.
    #[must_use]
    pub fn build(self) -> Arc<dyn EnvelopeCodec> {
        match self {
            Self::Json => Arc::new(JsonCodec),
            Self::Binary => Arc::new(BinaryCodec),
        }
    }
}

/// Largest payload, in bytes, either codec will decode.
///
/// The binary codec also refuses any length prefix that would claim more than
/// this before allocating for it.
pub const MAX_ENVELOPE_LEN: usize = 16 * 1024 * 1024;

/// Reject payloads larger than [`MAX_ENVELOPE_LEN`].
pub(crate) fn check_envelope_len(payload: &Payload) -> Result<(), DecodeError> {
    if payload.len() > MAX_ENVELOPE_LEN {
        Err(DecodeError::TooLarge {
            limit: MAX_ENVELOPE_LEN,
        })
    } else {
        Ok(())
    }
}

/// Check the non-empty identifier invariant of `apiName`/`msgName`.
pub(crate) fn validate_name(field: &'static str, name: &str) -> Result<(), DecodeError> {
    if name.is_empty() {
        Err(DecodeError::InvalidField {
            field,
            reason: "must not be empty".into(),
        })
    } else {
        Ok(())
    }
}

/// Reject envelopes that would violate an invariant once decoded.
pub(crate) fn validate_outbound(envelope: &Envelope) -> Result<(), EncodeError> {
    let checked = match envelope {
        Envelope::Request { api_name, .. } => validate_name("apiName", api_name),
        Envelope::Message { msg_name, .. } => validate_name("msgName", msg_name),
        Envelope::Response { .. } | Envelope::Heartbeat { .. } | Envelope::Custom { .. } => Ok(()),
    };
    checked.map_err(|e| EncodeError::Invalid {
        kind: envelope.kind().as_str(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests;
