//! Transport capabilities consumed by a connection.
//!
//! The engine never opens sockets or issues HTTP requests itself. An
//! application supplies either a [`RequestTransport`] (one payload out, one
//! payload back) or a [`SocketTransport`] (a persistent, full-duplex link
//! whose lifecycle is reported as [`SocketEvent`]s on a channel).

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{envelope::Payload, error::OpResult};

/// Per-exchange options of a request-style transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestOptions {
    /// Target URL.
    pub url: String,
    /// HTTP method.
    pub method: String,
    /// Headers sent with the payload.
    pub headers: HashMap<String, String>,
    /// Transport-level timeout, if any.
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "POST".to_owned(),
            headers: HashMap::new(),
            timeout: None,
        }
    }
}

impl RequestOptions {
    /// Options targeting `url` with the default method.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Add or replace a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Reply of a request-style exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportReply {
    /// Encoded reply envelope.
    pub body: Payload,
    /// Reply headers, lower-case names.
    pub headers: HashMap<String, String>,
    /// Transport status code, `200` on success.
    pub status_code: u16,
}

impl TransportReply {
    /// A successful reply with no headers.
    #[must_use]
    pub fn ok(body: Payload) -> Self {
        Self {
            body,
            headers: HashMap::new(),
            status_code: 200,
        }
    }

    /// Returns `true` for 2xx status codes.
    #[must_use]
    pub fn is_success(&self) -> bool { (200..300).contains(&self.status_code) }
}

/// One-payload-out, one-payload-back transport such as HTTP.
///
/// Dropping the future returned by [`send`](Self::send) aborts the exchange.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    /// Send `payload` and wait for the peer's reply.
    ///
    /// # Errors
    ///
    /// Returns a `NetworkError` when no reply could be obtained.
    async fn send(&self, payload: Payload, options: RequestOptions) -> OpResult<TransportReply>;
}

/// Options of a socket-style connection attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SocketOptions {
    /// Peer address.
    pub address: String,
    /// Requested sub-protocols.
    pub protocols: Vec<String>,
}

impl SocketOptions {
    /// Options targeting `address`.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            protocols: Vec::new(),
        }
    }
}

/// Lifecycle and data notifications of a socket link.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketEvent {
    /// The link is ready for traffic.
    Open,
    /// A payload arrived from the peer.
    Message(Payload),
    /// The link closed.
    Close {
        /// Close code, if the transport reports one.
        code: Option<u16>,
        /// Close reason, if the transport reports one.
        reason: Option<String>,
    },
    /// The link failed.
    Error(String),
}

/// Sender half handed to [`SocketTransport::connect`].
pub type SocketEvents = mpsc::UnboundedSender<SocketEvent>;

/// Persistent full-duplex transport such as a WebSocket.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    /// Start connecting; progress is reported through `events`.
    ///
    /// # Errors
    ///
    /// Returns a `NetworkError` if the attempt could not be started.
    async fn connect(
        &self,
        options: SocketOptions,
        events: SocketEvents,
    ) -> OpResult<Box<dyn SocketLink>>;
}

/// Established socket link.
#[async_trait]
pub trait SocketLink: Send + Sync {
    /// Send one payload.
    ///
    /// # Errors
    ///
    /// Returns a `NetworkError` if the payload could not be written.
    async fn send(&self, payload: Payload) -> OpResult<()>;

    /// Close the link.
    async fn close(&self, reason: Option<String>, code: Option<u16>);
}
