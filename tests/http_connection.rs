//! Request-style connections answered by a scripted transport.

use std::{collections::HashMap, sync::Arc};

use rstest::rstest;
use serde_json::json;
use tsrpc::{
    Body,
    CallOptions,
    Connection,
    ConnectionConfig,
    ConnectionState,
    Envelope,
    ErrorKind,
    Payload,
    ProtoInfo,
    ServiceMap,
    TsrpcError,
    proto_info::PROTO_INFO_HEADER,
    transport::{RequestOptions, TransportReply},
};
use tsrpc_testing::{RecordedRequest, ScriptedHttpTransport, response_reply};

/// Answer every request by echoing its body.
fn echo(request: &RecordedRequest) -> tsrpc::OpResult<TransportReply> {
    let Envelope::Request { sn, body, .. } = request.envelope() else {
        return Ok(TransportReply::ok(Payload::Text("{}".into())));
    };
    Ok(response_reply(&Envelope::Response {
        sn,
        body,
        error: None,
        proto_info: None,
    }))
}

#[tokio::test]
async fn first_call_connects_implicitly() {
    let transport = Arc::new(ScriptedHttpTransport::new(echo));
    let options = RequestOptions::new("http://api.test/").with_header("authorization", "Bearer x");
    let conn = Connection::http(
        transport.clone(),
        ConnectionConfig::default().with_request_options(options),
    );
    assert_eq!(conn.state(), ConnectionState::Created);

    let reply = conn
        .call_api("Echo", Body::from(json!({ "v": 1 })), CallOptions::default())
        .await;
    assert_eq!(reply, Ok(Body::from(json!({ "v": 1 }))));
    assert_eq!(conn.state(), ConnectionState::Connected);

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].options.url, "http://api.test/");
    assert_eq!(requests[0].options.method, "POST");
    assert_eq!(requests[0].header("Authorization"), Some("Bearer x"));
}

#[tokio::test]
async fn fingerprints_travel_in_headers() {
    let server_info = ProtoInfo::new("server", 9);
    let header = server_info.to_header_value();
    let transport = Arc::new(ScriptedHttpTransport::new(move |request| {
        let mut reply = echo(request)?;
        reply
            .headers
            .insert(PROTO_INFO_HEADER.to_uppercase(), header.clone());
        Ok(reply)
    }));
    let local = ProtoInfo::new("server", 9);
    let conn = Connection::http(
        transport.clone(),
        ConnectionConfig::default().with_proto_info(local.clone()),
    );

    for _ in 0..2 {
        conn.call_api("Echo", Body::empty(), CallOptions::default())
            .await
            .expect("call");
    }

    let requests = transport.requests();
    assert_eq!(
        requests[0].header(PROTO_INFO_HEADER),
        Some(local.to_header_value().as_str())
    );
    assert_eq!(requests[1].header(PROTO_INFO_HEADER), None);
    assert!(matches!(
        requests[0].envelope(),
        Envelope::Request {
            proto_info: None,
            ..
        }
    ));
    assert_eq!(conn.remote_proto_info(), Some(server_info));
}

#[rstest]
#[case::bad_gateway(502)]
#[case::server_error(500)]
#[tokio::test]
async fn undecodable_error_status_is_a_network_error(#[case] status: u16) {
    let transport = Arc::new(ScriptedHttpTransport::new(move |_request| {
        Ok(TransportReply {
            body: Payload::Text("<html>upstream down</html>".into()),
            headers: HashMap::new(),
            status_code: status,
        })
    }));
    let conn = Connection::http(transport, ConnectionConfig::default());

    let err = conn
        .call_api("Echo", Body::empty(), CallOptions::default())
        .await
        .expect_err("error status");
    assert_eq!(err.kind, ErrorKind::NetworkError);
    assert_eq!(err.info, Some(json!({ "statusCode": status })));
    assert_eq!(conn.pending_requests(), 0);
}

#[tokio::test]
async fn error_envelopes_win_over_status_codes() {
    let transport = Arc::new(ScriptedHttpTransport::new(|request| {
        let mut reply = response_reply(&Envelope::Response {
            sn: request.envelope().sn().unwrap_or_default(),
            body: Body::empty(),
            error: Some(TsrpcError::api("Invalid username")),
            proto_info: None,
        });
        reply.status_code = 500;
        Ok(reply)
    }));
    let conn = Connection::http(transport, ConnectionConfig::default());
    assert_eq!(
        conn.call_api("Login", Body::empty(), CallOptions::default())
            .await,
        Err(TsrpcError::api("Invalid username"))
    );
}

#[tokio::test]
async fn non_response_replies_are_decode_errors() {
    let transport = Arc::new(ScriptedHttpTransport::new(|_request| {
        Ok(response_reply(&Envelope::Message {
            msg_name: "Chat".into(),
            body: Body::empty(),
        }))
    }));
    let conn = Connection::http(transport, ConnectionConfig::default());
    let err = conn
        .call_api("Echo", Body::empty(), CallOptions::default())
        .await
        .expect_err("wrong kind");
    assert_eq!(err.kind, ErrorKind::DecodeError);
}

#[tokio::test]
async fn transport_failures_propagate() {
    let transport = Arc::new(ScriptedHttpTransport::new(|_request| {
        Err(TsrpcError::network("dns lookup failed"))
    }));
    let conn = Connection::http(transport, ConnectionConfig::default());
    assert_eq!(
        conn.call_api("Echo", Body::empty(), CallOptions::default())
            .await,
        Err(TsrpcError::network("dns lookup failed"))
    );
    assert_eq!(conn.pending_requests(), 0);
    assert_eq!(conn.state(), ConnectionState::Connected);
}

#[rstest]
#[case::accepted(204, true)]
#[case::rejected(503, false)]
#[tokio::test]
async fn messages_use_the_status_code(#[case] status: u16, #[case] accepted: bool) {
    let transport = Arc::new(ScriptedHttpTransport::new(move |_request| {
        Ok(TransportReply {
            body: Payload::Text(String::new()),
            headers: HashMap::new(),
            status_code: status,
        })
    }));
    let conn = Connection::http(transport.clone(), ConnectionConfig::default());
    let result = conn.send_msg("Chat", Body::from(json!("hi"))).await;
    assert_eq!(result.is_ok(), accepted, "{result:?}");
    assert_eq!(
        transport.requests()[0].envelope(),
        Envelope::Message {
            msg_name: "Chat".into(),
            body: Body::from(json!("hi")),
        }
    );
}

#[tokio::test]
async fn unknown_apis_never_reach_the_transport() {
    let transport = Arc::new(ScriptedHttpTransport::new(echo));
    let service = ServiceMap::new().with_api("Echo", "ReqEcho", "ResEcho");
    let conn = Connection::http(
        transport.clone(),
        ConnectionConfig::default().with_service(service),
    );

    let err = conn
        .call_api("Ecoh", Body::empty(), CallOptions::default())
        .await
        .expect_err("typo");
    assert_eq!(err.kind, ErrorKind::InternalError);
    assert_eq!(err.info, Some(json!({ "code": "INVALID_API_NAME" })));
    assert!(transport.requests().is_empty());
    assert_eq!(conn.state(), ConnectionState::Created);
}
