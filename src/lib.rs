#![doc(html_root_url = "https://docs.rs/tsrpc/latest")]
//! Public API for the `tsrpc` library.
//!
//! This crate provides the transport-agnostic core of an RPC protocol:
//! envelope codecs, request/response correlation, message dispatch,
//! interception flows, schema fingerprint negotiation and the connection
//! state machine binding them to a pluggable transport.

pub mod classify;
pub mod codec;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod flow;
pub mod logging;
pub mod metrics;
pub mod panic;
pub mod proto_info;
pub mod service;
pub mod transport;

pub use classify::HandlerError;
pub use codec::{BinaryCodec, CodecKind, DecodeError, EncodeError, EnvelopeCodec, JsonCodec};
pub use config::{CallOptions, ConnectionConfig, HeartbeatConfig};
pub use connection::{
    ApiCall,
    ApiHandler,
    Connection,
    ConnectionId,
    ConnectionState,
    api_handler,
};
pub use correlator::RequestCorrelator;
pub use dispatcher::{MsgDispatcher, MsgEvent, MsgHandler, msg_handler};
pub use envelope::{Body, Envelope, EnvelopeKind, Payload};
pub use error::{ErrorKind, OpResult, TsrpcError};
pub use flow::{ConnectionFlows, Flow, FlowControl};
pub use logging::{LogLevel, Logger};
pub use proto_info::{ProtoInfo, ProtoMismatch};
pub use service::ServiceMap;
