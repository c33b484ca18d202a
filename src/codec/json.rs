//! Human-readable JSON envelope codec.
//!
//! Each payload is one JSON object whose `type` field selects the envelope
//! kind (`req`, `res`, `msg`, `heartbeat`, `custom`). Field names follow the
//! camel-case convention used by browser peers.

use serde_json::{Map, Value};

use super::{
    DecodeError,
    EncodeError,
    EnvelopeCodec,
    check_envelope_len,
    validate_name,
    validate_outbound,
};
use crate::{
    envelope::{Body, Envelope, EnvelopeKind, Payload},
    error::TsrpcError,
    proto_info::ProtoInfo,
};

/// JSON text codec.
///
/// # Examples
///
/// ```
/// use tsrpc::{Envelope, JsonCodec, codec::EnvelopeCodec};
///
/// let envelope = Envelope::Heartbeat { sn: 4, reply: false };
/// let payload = JsonCodec.encode(&envelope).expect("encode");
/// assert_eq!(JsonCodec.decode(&payload).expect("decode"), envelope);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl EnvelopeCodec for JsonCodec {
    fn encode(&self, envelope: &Envelope) -> Result<Payload, EncodeError> {
        validate_outbound(envelope)?;
        let kind = envelope.kind().as_str();
        let serialize_err = |e: serde_json::Error| EncodeError::Serialize {
            kind,
            reason: e.to_string(),
        };

        let mut object = Map::new();
        object.insert("type".into(), Value::from(kind));
        match envelope {
            Envelope::Request {
                sn,
                api_name,
                body,
                proto_info,
            } => {
                object.insert("sn".into(), Value::from(*sn));
                object.insert("apiName".into(), Value::from(api_name.as_str()));
                object.insert("body".into(), serde_json::to_value(body).map_err(serialize_err)?);
                if let Some(info) = proto_info {
                    object.insert(
                        "protoInfo".into(),
                        serde_json::to_value(info).map_err(serialize_err)?,
                    );
                }
            }
            Envelope::Response {
                sn,
                body,
                error,
                proto_info,
            } => {
                object.insert("sn".into(), Value::from(*sn));
                object.insert("body".into(), serde_json::to_value(body).map_err(serialize_err)?);
                if let Some(error) = error {
                    object.insert(
                        "error".into(),
                        serde_json::to_value(error).map_err(serialize_err)?,
                    );
                }
                if let Some(info) = proto_info {
                    object.insert(
                        "protoInfo".into(),
                        serde_json::to_value(info).map_err(serialize_err)?,
                    );
                }
            }
            Envelope::Message { msg_name, body } => {
                object.insert("msgName".into(), Value::from(msg_name.as_str()));
                object.insert("body".into(), serde_json::to_value(body).map_err(serialize_err)?);
            }
            Envelope::Heartbeat { sn, reply } => {
                object.insert("sn".into(), Value::from(*sn));
                object.insert("isReply".into(), Value::from(*reply));
            }
            Envelope::Custom { fields } => {
                object.insert("fields".into(), Value::Object(fields.clone()));
            }
        }

        serde_json::to_string(&Value::Object(object))
            .map(Payload::Text)
            .map_err(serialize_err)
    }

    fn decode(&self, payload: &Payload) -> Result<Envelope, DecodeError> {
        check_envelope_len(payload)?;
        let value: Value = serde_json::from_slice(payload.as_bytes())
            .map_err(|e| DecodeError::Malformed(e.to_string()))?;
        let Value::Object(mut object) = value else {
            return Err(DecodeError::Malformed("expected a JSON object".into()));
        };
        let tag = match object.remove("type") {
            Some(Value::String(tag)) => tag,
            Some(other) => {
                return Err(DecodeError::InvalidField {
                    field: "type",
                    reason: format!("expected a string, got {other}"),
                });
            }
            None => {
                return Err(DecodeError::MissingField {
                    kind: "envelope",
                    field: "type",
                });
            }
        };

        let mut fields = Fields {
            kind: EnvelopeKind::Request,
            object,
        };
        match tag.as_str() {
            "req" => {
                fields.kind = EnvelopeKind::Request;
                let sn = fields.sn()?;
                let api_name = fields.name("apiName")?;
                Ok(Envelope::Request {
                    sn,
                    api_name,
                    body: fields.body()?,
                    proto_info: fields.proto_info()?,
                })
            }
            "res" => {
                fields.kind = EnvelopeKind::Response;
                let sn = fields.sn()?;
                Ok(Envelope::Response {
                    sn,
                    body: fields.body()?,
                    error: fields.error()?,
                    proto_info: fields.proto_info()?,
                })
            }
            "msg" => {
                fields.kind = EnvelopeKind::Message;
                let msg_name = fields.name("msgName")?;
                Ok(Envelope::Message {
                    msg_name,
                    body: fields.body()?,
                })
            }
            "heartbeat" => {
                fields.kind = EnvelopeKind::Heartbeat;
                let sn = fields.sn()?;
                let reply = match fields.object.remove("isReply") {
                    None | Some(Value::Null) => false,
                    Some(Value::Bool(reply)) => reply,
                    Some(other) => {
                        return Err(DecodeError::InvalidField {
                            field: "isReply",
                            reason: format!("expected a boolean, got {other}"),
                        });
                    }
                };
                Ok(Envelope::Heartbeat { sn, reply })
            }
            "custom" => {
                fields.kind = EnvelopeKind::Custom;
                match fields.require("fields")? {
                    Value::Object(fields) => Ok(Envelope::Custom { fields }),
                    other => Err(DecodeError::InvalidField {
                        field: "fields",
                        reason: format!("expected an object, got {other}"),
                    }),
                }
            }
            _ => Err(DecodeError::UnknownType(tag)),
        }
    }
}

/// Field extraction helpers bound to the envelope kind being decoded.
struct Fields {
    kind: EnvelopeKind,
    object: Map<String, Value>,
}

impl Fields {
    fn require(&mut self, field: &'static str) -> Result<Value, DecodeError> {
        self.object
            .remove(field)
            .ok_or(DecodeError::MissingField {
                kind: self.kind.as_str(),
                field,
            })
    }

    fn sn(&mut self) -> Result<u32, DecodeError> {
        let value = self.require("sn")?;
        value
            .as_u64()
            .and_then(|sn| u32::try_from(sn).ok())
            .ok_or_else(|| DecodeError::InvalidField {
                field: "sn",
                reason: format!("expected an unsigned 32-bit integer, got {value}"),
            })
    }

    fn name(&mut self, field: &'static str) -> Result<String, DecodeError> {
        match self.require(field)? {
            Value::String(name) => {
                validate_name(field, &name)?;
                Ok(name)
            }
            other => Err(DecodeError::InvalidField {
                field,
                reason: format!("expected a string, got {other}"),
            }),
        }
    }

    fn body(&mut self) -> Result<Body, DecodeError> {
        serde_json::from_value(self.require("body")?).map_err(|e| DecodeError::InvalidField {
            field: "body",
            reason: e.to_string(),
        })
    }

    fn proto_info(&mut self) -> Result<Option<ProtoInfo>, DecodeError> {
        self.optional("protoInfo")
    }

    fn error(&mut self) -> Result<Option<TsrpcError>, DecodeError> { self.optional("error") }

    fn optional<T: serde::de::DeserializeOwned>(
        &mut self,
        field: &'static str,
    ) -> Result<Option<T>, DecodeError> {
        match self.object.remove(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| DecodeError::InvalidField {
                    field,
                    reason: e.to_string(),
                }),
        }
    }
}

/// Build a request payload by hand, as a browser peer would.
#[cfg(test)]
pub(crate) fn raw_request(sn: u64, api_name: &str) -> Payload {
    Payload::Text(
        serde_json::json!({ "type": "req", "sn": sn, "apiName": api_name, "body": { "value": null } })
            .to_string(),
    )
}
