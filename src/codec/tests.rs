//! Unit tests for the envelope codecs.

use proptest::prelude::*;
use rstest::rstest;
use serde_json::{Value, json};

use super::*;
use crate::{
    envelope::Body,
    error::TsrpcError,
    proto_info::ProtoInfo,
};

fn codecs() -> [Arc<dyn EnvelopeCodec>; 2] { [CodecKind::Json.build(), CodecKind::Binary.build()] }

fn sample_envelopes() -> Vec<Envelope> {
    let mut fields = serde_json::Map::new();
    fields.insert("trace".into(), json!("abc"));
    vec![
        Envelope::Request {
            sn: u32::MAX,
            api_name: "user/Login".into(),
            body: Body::from(json!({ "user": "ann" })),
            proto_info: Some(ProtoInfo::new("d41d8cd9", 1_700_000_000_000).with_node_version("v20")),
        },
        Envelope::Response {
            sn: 0,
            body: Body::empty(),
            error: Some(TsrpcError::api("Denied").with_info(json!({ "code": 7 }))),
            proto_info: None,
        },
        Envelope::Message {
            msg_name: "Chat".into(),
            body: Body::from(vec![0, 255, 7]),
        },
        Envelope::Heartbeat { sn: 42, reply: true },
        Envelope::Custom { fields },
    ]
}

#[test]
fn every_kind_round_trips_through_both_codecs() {
    for codec in codecs() {
        for envelope in sample_envelopes() {
            let payload = codec.encode(&envelope).expect("encode");
            assert_eq!(codec.decode(&payload).expect("decode"), envelope);
        }
    }
}

#[test]
fn json_codec_produces_text_and_binary_codec_bytes() {
    let envelope = Envelope::Heartbeat { sn: 1, reply: false };
    assert!(matches!(JsonCodec.encode(&envelope), Ok(Payload::Text(_))));
    assert!(matches!(BinaryCodec.encode(&envelope), Ok(Payload::Binary(_))));
}

#[test]
fn json_request_field_names_are_camel_case() {
    let payload = JsonCodec
        .encode(&Envelope::Request {
            sn: 3,
            api_name: "Echo".into(),
            body: Body::from(json!(1)),
            proto_info: None,
        })
        .expect("encode");
    let value: Value = serde_json::from_slice(payload.as_bytes()).expect("json");
    assert_eq!(
        value,
        json!({ "type": "req", "sn": 3, "apiName": "Echo", "body": { "value": 1 } })
    );
}

#[test]
fn hand_written_request_decodes() {
    let envelope = JsonCodec.decode(&json::raw_request(9, "Echo")).expect("decode");
    assert_eq!(envelope.sn(), Some(9));
}

#[rstest]
#[case(json!({ "type": "bogus" }), DecodeError::UnknownType("bogus".into()))]
#[case(json!({ "sn": 1 }), DecodeError::MissingField { kind: "envelope", field: "type" })]
#[case(
    json!({ "type": "req", "apiName": "Echo", "body": { "value": null } }),
    DecodeError::MissingField { kind: "req", field: "sn" }
)]
#[case(
    json!({ "type": "msg", "body": { "value": null } }),
    DecodeError::MissingField { kind: "msg", field: "msgName" }
)]
#[case(
    json!({ "type": "res", "sn": 1 }),
    DecodeError::MissingField { kind: "res", field: "body" }
)]
fn json_rejects_incomplete_envelopes(#[case] input: Value, #[case] expected: DecodeError) {
    let payload = Payload::Text(input.to_string());
    assert_eq!(JsonCodec.decode(&payload), Err(expected));
}

#[rstest]
#[case(json!({ "type": "req", "sn": 4_294_967_296_u64, "apiName": "Echo", "body": { "value": null } }), "sn")]
#[case(json!({ "type": "req", "sn": -1, "apiName": "Echo", "body": { "value": null } }), "sn")]
#[case(json!({ "type": "req", "sn": 1, "apiName": "", "body": { "value": null } }), "apiName")]
#[case(json!({ "type": "heartbeat", "sn": 1, "isReply": "yes" }), "isReply")]
#[case(json!({ "type": "custom", "fields": [] }), "fields")]
fn json_rejects_invalid_fields(#[case] input: Value, #[case] field: &str) {
    let payload = Payload::Text(input.to_string());
    match JsonCodec.decode(&payload) {
        Err(DecodeError::InvalidField { field: got, .. }) => assert_eq!(got, field),
        other => panic!("expected invalid {field}, got {other:?}"),
    }
}

#[test]
fn json_rejects_non_objects() {
    assert!(matches!(
        JsonCodec.decode(&Payload::Text("[1,2]".into())),
        Err(DecodeError::Malformed(_))
    ));
    assert!(matches!(
        JsonCodec.decode(&Payload::Text("not json".into())),
        Err(DecodeError::Malformed(_))
    ));
}

#[test]
fn binary_rejects_unknown_discriminant() {
    let payload = Payload::Binary(bytes::Bytes::from_static(&[9, 1]));
    assert!(matches!(
        BinaryCodec.decode(&payload),
        Err(DecodeError::UnknownType(_))
    ));
}

#[test]
fn binary_rejects_truncated_payloads() {
    let encoded = BinaryCodec
        .encode(&Envelope::Message {
            msg_name: "Chat".into(),
            body: Body::from(vec![1, 2, 3, 4]),
        })
        .expect("encode");
    let truncated = Payload::Binary(bytes::Bytes::copy_from_slice(
        &encoded.as_bytes()[..encoded.len() - 2],
    ));
    assert!(matches!(
        BinaryCodec.decode(&truncated),
        Err(DecodeError::Truncated(_))
    ));
}

#[test]
fn binary_rejects_trailing_bytes() {
    let encoded = BinaryCodec
        .encode(&Envelope::Heartbeat { sn: 1, reply: false })
        .expect("encode");
    let mut bytes = encoded.as_bytes().to_vec();
    bytes.push(0);
    assert!(matches!(
        BinaryCodec.decode(&Payload::Binary(bytes.into())),
        Err(DecodeError::Malformed(_))
    ));
}

/// Message discriminant followed by a varint `u64` length prefix.
fn oversized_name_prefix(len: u64) -> Payload {
    let mut bytes = vec![2, 253];
    bytes.extend_from_slice(&len.to_le_bytes());
    Payload::Binary(bytes.into())
}

#[rstest]
#[case::absurd(u64::MAX / 4)]
#[case::just_over(MAX_ENVELOPE_LEN as u64 + 1)]
fn binary_refuses_oversized_length_prefixes(#[case] len: u64) {
    assert_eq!(
        BinaryCodec.decode(&oversized_name_prefix(len)),
        Err(DecodeError::TooLarge {
            limit: MAX_ENVELOPE_LEN
        })
    );
}

#[test]
fn binary_refuses_oversized_byte_bodies() {
    // Message "m" whose byte body claims far more than the cap.
    let mut bytes = vec![2, 1, b'm', 0, 253];
    bytes.extend_from_slice(&(u64::MAX / 2).to_le_bytes());
    assert_eq!(
        BinaryCodec.decode(&Payload::Binary(bytes.into())),
        Err(DecodeError::TooLarge {
            limit: MAX_ENVELOPE_LEN
        })
    );
}

#[rstest]
#[case(CodecKind::Json)]
#[case(CodecKind::Binary)]
fn oversized_payloads_are_rejected_before_parsing(#[case] kind: CodecKind) {
    let payload = Payload::Binary(vec![b' '; MAX_ENVELOPE_LEN + 1].into());
    assert_eq!(
        kind.build().decode(&payload),
        Err(DecodeError::TooLarge {
            limit: MAX_ENVELOPE_LEN
        })
    );
}

#[rstest]
#[case(CodecKind::Json)]
#[case(CodecKind::Binary)]
fn empty_names_cannot_be_encoded(#[case] kind: CodecKind) {
    let envelope = Envelope::Message {
        msg_name: String::new(),
        body: Body::empty(),
    };
    assert!(matches!(
        kind.build().encode(&envelope),
        Err(EncodeError::Invalid { kind: "msg", .. })
    ));
}

fn name_strategy() -> impl Strategy<Value = String> { "[A-Za-z][A-Za-z0-9/_]{0,15}" }

fn body_strategy() -> impl Strategy<Value = Body> {
    let value = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[ -~]{0,24}".prop_map(Value::from),
        prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..4)
            .prop_map(|entries| json!(entries)),
    ];
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..64).prop_map(Body::Bytes),
        value.prop_map(Body::Value),
    ]
}

fn proto_info_strategy() -> impl Strategy<Value = Option<ProtoInfo>> {
    prop::option::of(
        ("[0-9a-f]{32}", any::<i64>(), prop::option::of("v[0-9]{1,2}"))
            .prop_map(|(md5, modified, node)| {
                let info = ProtoInfo::new(md5, modified);
                match node {
                    Some(node) => info.with_node_version(node),
                    None => info,
                }
            }),
    )
}

fn envelope_strategy() -> impl Strategy<Value = Envelope> {
    prop_oneof![
        (any::<u32>(), name_strategy(), body_strategy(), proto_info_strategy()).prop_map(
            |(sn, api_name, body, proto_info)| Envelope::Request {
                sn,
                api_name,
                body,
                proto_info,
            }
        ),
        (
            any::<u32>(),
            body_strategy(),
            prop::option::of("[ -~]{0,16}"),
            proto_info_strategy()
        )
            .prop_map(|(sn, body, error, proto_info)| Envelope::Response {
                sn,
                body,
                error: error.map(TsrpcError::api),
                proto_info,
            }),
        (name_strategy(), body_strategy())
            .prop_map(|(msg_name, body)| Envelope::Message { msg_name, body }),
        (any::<u32>(), any::<bool>()).prop_map(|(sn, reply)| Envelope::Heartbeat { sn, reply }),
    ]
}

proptest! {
    #[test]
    fn json_round_trips_valid_envelopes(envelope in envelope_strategy()) {
        let payload = JsonCodec.encode(&envelope).expect("encode");
        prop_assert_eq!(JsonCodec.decode(&payload).expect("decode"), envelope);
    }

    #[test]
    fn binary_round_trips_valid_envelopes(envelope in envelope_strategy()) {
        let payload = BinaryCodec.encode(&envelope).expect("encode");
        prop_assert_eq!(BinaryCodec.decode(&payload).expect("decode"), envelope);
    }

    #[test]
    fn decoding_garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let payload = Payload::Binary(bytes.into());
        let _ = BinaryCodec.decode(&payload);
        let _ = JsonCodec.decode(&payload);
    }
}
