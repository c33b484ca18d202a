//! Compact binary envelope codec built on `bincode`.
//!
//! Envelopes are mirrored into private wire structs deriving
//! [`bincode::Encode`]/[`bincode::Decode`] and serialised with bincode's
//! standard configuration (variable-length integers). Structured bodies and
//! custom fields travel as embedded JSON text; byte bodies are copied
//! verbatim. Decoding is bounded by [`MAX_ENVELOPE_LEN`] so a forged length
//! prefix cannot trigger an unbounded allocation.

use bincode::{
    Decode,
    Encode,
    config::{self, Config},
    error::DecodeError as BincodeDecodeError,
};
use bytes::Bytes;

use super::{
    DecodeError,
    EncodeError,
    EnvelopeCodec,
    MAX_ENVELOPE_LEN,
    check_envelope_len,
    validate_name,
    validate_outbound,
};
use crate::{
    envelope::{Body, Envelope, Payload},
    error::{ErrorKind, TsrpcError},
    proto_info::ProtoInfo,
};

/// Binary codec producing [`Payload::Binary`].
///
/// # Examples
///
/// ```
/// use tsrpc::{BinaryCodec, Body, Envelope, codec::EnvelopeCodec};
///
/// let envelope = Envelope::Message {
///     msg_name: "Chat".into(),
///     body: Body::from(vec![1, 2, 3]),
/// };
/// let payload = BinaryCodec.encode(&envelope).expect("encode");
/// assert_eq!(BinaryCodec.decode(&payload).expect("decode"), envelope);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct BinaryCodec;

#[derive(Encode, Decode)]
enum WireEnvelope {
    Request {
        sn: u32,
        api_name: String,
        body: WireBody,
        proto_info: Option<WireProtoInfo>,
    },
    Response {
        sn: u32,
        body: WireBody,
        error: Option<WireError>,
        proto_info: Option<WireProtoInfo>,
    },
    Message {
        msg_name: String,
        body: WireBody,
    },
    Heartbeat {
        sn: u32,
        reply: bool,
    },
    Custom {
        fields: String,
    },
}

#[derive(Encode, Decode)]
enum WireBody {
    Bytes(Vec<u8>),
    Json(String),
}

#[derive(Encode, Decode)]
struct WireProtoInfo {
    last_modified: i64,
    md5: String,
    tsrpc_version: String,
    node_version: Option<String>,
}

#[derive(Encode, Decode)]
struct WireError {
    kind: String,
    message: String,
    info: Option<String>,
}

impl EnvelopeCodec for BinaryCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Payload, EncodeError> {
        validate_outbound(envelope)?;
        let kind = envelope.kind().as_str();
        let json_err = |e: serde_json::Error| EncodeError::Serialize {
            kind,
            reason: e.to_string(),
        };

        let wire = match envelope {
            Envelope::Request {
                sn,
                api_name,
                body,
                proto_info,
            } => WireEnvelope::Request {
                sn: *sn,
                api_name: api_name.clone(),
                body: WireBody::from_body(body).map_err(json_err)?,
                proto_info: proto_info.as_ref().map(WireProtoInfo::from),
            },
            Envelope::Response {
                sn,
                body,
                error,
                proto_info,
            } => WireEnvelope::Response {
                sn: *sn,
                body: WireBody::from_body(body).map_err(json_err)?,
                error: error
                    .as_ref()
                    .map(WireError::from_error)
                    .transpose()
                    .map_err(json_err)?,
                proto_info: proto_info.as_ref().map(WireProtoInfo::from),
            },
            Envelope::Message { msg_name, body } => WireEnvelope::Message {
                msg_name: msg_name.clone(),
                body: WireBody::from_body(body).map_err(json_err)?,
            },
            Envelope::Heartbeat { sn, reply } => WireEnvelope::Heartbeat {
                sn: *sn,
                reply: *reply,
            },
            Envelope::Custom { fields } => WireEnvelope::Custom {
                fields: serde_json::to_string(fields).map_err(json_err)?,
            },
        };

        bincode::encode_to_vec(wire, wire_config())
            .map(|bytes| Payload::Binary(Bytes::from(bytes)))
            .map_err(|e| EncodeError::Serialize {
                kind,
                reason: e.to_string(),
            })
    }

    fn decode(&self, payload: &Payload) -> Result<Envelope, DecodeError> {
        check_envelope_len(payload)?;
        let bytes = payload.as_bytes();
        let (wire, consumed): (WireEnvelope, usize) =
            bincode::decode_from_slice(bytes, wire_config()).map_err(map_bincode_error)?;
        if consumed != bytes.len() {
            return Err(DecodeError::Malformed(format!(
                "{} trailing bytes after envelope",
                bytes.len() - consumed
            )));
        }

        match wire {
            WireEnvelope::Request {
                sn,
                api_name,
                body,
                proto_info,
            } => {
                validate_name("apiName", &api_name)?;
                Ok(Envelope::Request {
                    sn,
                    api_name,
                    body: body.into_body()?,
                    proto_info: proto_info.map(ProtoInfo::from),
                })
            }
            WireEnvelope::Response {
                sn,
                body,
                error,
                proto_info,
            } => Ok(Envelope::Response {
                sn,
                body: body.into_body()?,
                error: error.map(WireError::into_error).transpose()?,
                proto_info: proto_info.map(ProtoInfo::from),
            }),
            WireEnvelope::Message { msg_name, body } => {
                validate_name("msgName", &msg_name)?;
                Ok(Envelope::Message {
                    msg_name,
                    body: body.into_body()?,
                })
            }
            WireEnvelope::Heartbeat { sn, reply } => Ok(Envelope::Heartbeat { sn, reply }),
            WireEnvelope::Custom { fields } => serde_json::from_str(&fields)
                .map(|fields| Envelope::Custom { fields })
                .map_err(|e| DecodeError::InvalidField {
                    field: "fields",
                    reason: e.to_string(),
                }),
        }
    }
}

/// Standard configuration capped at [`MAX_ENVELOPE_LEN`] claimed bytes.
fn wire_config() -> impl Config { config::standard().with_limit::<MAX_ENVELOPE_LEN>() }

fn map_bincode_error(error: BincodeDecodeError) -> DecodeError {
    match error {
        BincodeDecodeError::LimitExceeded => DecodeError::TooLarge {
            limit: MAX_ENVELOPE_LEN,
        },
        BincodeDecodeError::UnexpectedVariant {
            type_name, found, ..
        } => DecodeError::UnknownType(format!("{type_name} discriminant {found}")),
        BincodeDecodeError::UnexpectedEnd { additional } => {
            DecodeError::Truncated(format!("{additional} more bytes required"))
        }
        other => DecodeError::Malformed(other.to_string()),
    }
}

impl WireBody {
    fn from_body(body: &Body) -> Result<Self, serde_json::Error> {
        match body {
            Body::Bytes(bytes) => Ok(Self::Bytes(bytes.clone())),
            Body::Value(value) => serde_json::to_string(value).map(Self::Json),
        }
    }

    fn into_body(self) -> Result<Body, DecodeError> {
        match self {
            Self::Bytes(bytes) => Ok(Body::Bytes(bytes)),
            Self::Json(text) => serde_json::from_str(&text).map(Body::Value).map_err(|e| {
                DecodeError::InvalidField {
                    field: "body",
                    reason: e.to_string(),
                }
            }),
        }
    }
}

impl From<&ProtoInfo> for WireProtoInfo {
    fn from(info: &ProtoInfo) -> Self {
        Self {
            last_modified: info.last_modified,
            md5: info.md5.clone(),
            tsrpc_version: info.tsrpc_version.clone(),
            node_version: info.node_version.clone(),
        }
    }
}

impl From<WireProtoInfo> for ProtoInfo {
    fn from(wire: WireProtoInfo) -> Self {
        Self {
            last_modified: wire.last_modified,
            md5: wire.md5,
            tsrpc_version: wire.tsrpc_version,
            node_version: wire.node_version,
        }
    }
}

impl WireError {
    fn from_error(error: &TsrpcError) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: error.kind.as_str().to_owned(),
            message: error.message.clone(),
            info: error.info.as_ref().map(serde_json::to_string).transpose()?,
        })
    }

    fn into_error(self) -> Result<TsrpcError, DecodeError> {
        let kind = self
            .kind
            .parse::<ErrorKind>()
            .map_err(|e| DecodeError::InvalidField {
                field: "error.kind",
                reason: e.to_string(),
            })?;
        let info = self
            .info
            .map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(|e| DecodeError::InvalidField {
                field: "error.info",
                reason: e.to_string(),
            })?;
        Ok(TsrpcError {
            kind,
            message: self.message,
            info,
        })
    }
}
