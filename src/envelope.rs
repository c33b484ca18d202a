//! Protocol envelope types.
//!
//! Every unit exchanged with a peer is an [`Envelope`]. Bodies are opaque to
//! the engine: a [`Body`] is either raw bytes produced by an external schema
//! serializer or a structured JSON value.

use bytes::Bytes;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{error::TsrpcError, proto_info::ProtoInfo};

/// Opaque request, response or message body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Body {
    /// Bytes produced by an external serializer.
    Bytes(Vec<u8>),
    /// Structured value.
    Value(serde_json::Value),
}

impl Body {
    /// An empty structured body (`null`).
    #[must_use]
    pub const fn empty() -> Self { Self::Value(serde_json::Value::Null) }

    /// Serialise `value` into a structured body.
    ///
    /// # Errors
    ///
    /// Returns an `InternalError` if `value` cannot be represented as JSON.
    pub fn from_typed<T: Serialize>(value: &T) -> Result<Self, TsrpcError> {
        serde_json::to_value(value)
            .map(Self::Value)
            .map_err(|e| TsrpcError::internal(format!("failed to serialise body: {e}")))
    }

    /// Interpret a structured body as `T`.
    ///
    /// # Errors
    ///
    /// Returns a `DecodeError` for byte bodies or values of the wrong shape.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, TsrpcError> {
        match self {
            Self::Value(value) => serde_json::from_value(value.clone())
                .map_err(|e| TsrpcError::decode(format!("unexpected body shape: {e}"))),
            Self::Bytes(_) => Err(TsrpcError::decode("expected a structured body, got bytes")),
        }
    }

    /// Borrow the structured value, if any.
    #[must_use]
    pub fn as_value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Bytes(_) => None,
        }
    }

    /// Borrow the raw bytes, if any.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            Self::Value(_) => None,
        }
    }
}

impl Default for Body {
    fn default() -> Self { Self::empty() }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self { Self::Value(value) }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self { Self::Bytes(bytes) }
}

/// Framing structure wrapping every unit sent over the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Envelope {
    /// API call awaiting a [`Envelope::Response`] with the same `sn`.
    Request {
        /// Per-connection sequence number.
        sn: u32,
        /// Case-sensitive API identifier.
        api_name: String,
        /// Request body.
        body: Body,
        /// Local schema fingerprint, sent on first contact.
        proto_info: Option<ProtoInfo>,
    },
    /// Reply to a request.
    Response {
        /// Sequence number of the request being answered.
        sn: u32,
        /// Response body; meaningless when `error` is set.
        body: Body,
        /// Wire-safe failure reported by the remote handler.
        error: Option<TsrpcError>,
        /// Remote schema fingerprint, only when the request carried one.
        proto_info: Option<ProtoInfo>,
    },
    /// One-way message.
    Message {
        /// Case-sensitive message identifier.
        msg_name: String,
        /// Message body.
        body: Body,
    },
    /// Liveness probe or its reply.
    Heartbeat {
        /// Probe sequence number echoed by the reply.
        sn: u32,
        /// `true` when answering a probe.
        reply: bool,
    },
    /// Application-defined envelope, opaque to the engine.
    Custom {
        /// Arbitrary fields.
        fields: serde_json::Map<String, serde_json::Value>,
    },
}

/// Discriminator of an [`Envelope`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    /// [`Envelope::Request`].
    Request,
    /// [`Envelope::Response`].
    Response,
    /// [`Envelope::Message`].
    Message,
    /// [`Envelope::Heartbeat`].
    Heartbeat,
    /// [`Envelope::Custom`].
    Custom,
}

impl EnvelopeKind {
    /// Wire tag used by the text codec.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Request => "req",
            Self::Response => "res",
            Self::Message => "msg",
            Self::Heartbeat => "heartbeat",
            Self::Custom => "custom",
        }
    }
}

impl Envelope {
    /// Discriminator of this envelope.
    #[must_use]
    pub const fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Request { .. } => EnvelopeKind::Request,
            Self::Response { .. } => EnvelopeKind::Response,
            Self::Message { .. } => EnvelopeKind::Message,
            Self::Heartbeat { .. } => EnvelopeKind::Heartbeat,
            Self::Custom { .. } => EnvelopeKind::Custom,
        }
    }

    /// Sequence number, for the kinds that carry one.
    #[must_use]
    pub const fn sn(&self) -> Option<u32> {
        match self {
            Self::Request { sn, .. } | Self::Response { sn, .. } | Self::Heartbeat { sn, .. } => {
                Some(*sn)
            }
            Self::Message { .. } | Self::Custom { .. } => None,
        }
    }
}

/// Encoded envelope as handed to a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Human-readable encoding.
    Text(String),
    /// Binary encoding.
    Binary(Bytes),
}

impl Payload {
    /// Size of the encoded payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns `true` for an empty payload.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// View the payload as bytes regardless of encoding.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}
