//! Connection state machine.
//!
//! A [`Connection`] binds one transport to the protocol machinery: it
//! correlates requests with responses, fans inbound messages out to
//! handlers, serves inbound requests, runs the interception flows and
//! negotiates schema fingerprints. Socket connections run one reader task
//! that processes inbound envelopes strictly in arrival order, plus an
//! optional heartbeat task. Dropping the last handle closes the connection
//! and stops both tasks.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tsrpc::{Body, CallOptions, Connection, ConnectionConfig, transport::RequestTransport};
//!
//! # async fn demo(transport: Arc<dyn RequestTransport>) -> tsrpc::OpResult<()> {
//! let conn = Connection::http(transport, ConnectionConfig::default());
//! let reply = conn
//!     .call_api("Echo", Body::from(serde_json::json!({ "v": 1 })), CallOptions::default())
//!     .await?;
//! # let _ = reply;
//! conn.close(None).await;
//! # Ok(())
//! # }
//! ```

mod heartbeat;
mod inbound;
mod outbound;
mod serve;
mod state;

use std::{
    fmt,
    sync::{
        Arc,
        PoisonError,
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::{DashMap, mapref::entry::Entry};
use heartbeat::HeartbeatMonitor;
pub use serve::{ApiCall, ApiHandler, api_handler};
pub use state::ConnectionState;
use state::StateCell;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    config::{CallOptions, ConnectionConfig},
    correlator::RequestCorrelator,
    dispatcher::{MsgDispatcher, MsgHandler},
    envelope::{Body, Payload},
    error::{OpResult, TsrpcError},
    flow::{ConnectContext, ConnectionFlows, DisconnectContext, FlowControl},
    logging::Logger,
    proto_info::{ProtoInfo, ProtoNegotiator},
    transport::{RequestTransport, SocketEvent, SocketLink, SocketTransport},
};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self { Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "ConnectionId({})", self.0) }
}

type OpenedSocket = (
    Arc<dyn SocketLink>,
    mpsc::UnboundedReceiver<SocketEvent>,
    Vec<Payload>,
);

enum Transport {
    Http(Arc<dyn RequestTransport>),
    Socket(Arc<dyn SocketTransport>),
}

/// Why a connection is being torn down.
#[derive(Debug)]
enum CloseCause {
    /// The application called `close`.
    Manual(Option<String>),
    /// The peer closed the link.
    Remote {
        code: Option<u16>,
        reason: Option<String>,
    },
    /// Transport failure or missed heartbeat.
    Failure(TsrpcError),
}

impl CloseCause {
    fn reason(&self) -> Option<String> {
        match self {
            Self::Manual(reason) => reason.clone(),
            Self::Remote { code, reason } => match (code, reason) {
                (_, Some(reason)) => Some(reason.clone()),
                (Some(code), None) => Some(format!("closed by peer with code {code}")),
                (None, None) => Some("closed by peer".to_owned()),
            },
            Self::Failure(err) => Some(err.message.clone()),
        }
    }
}

struct Shared {
    id: ConnectionId,
    transport: Transport,
    config: ConnectionConfig,
    logger: Arc<dyn Logger>,
    state: StateCell,
    correlator: RequestCorrelator,
    dispatcher: MsgDispatcher,
    flows: ConnectionFlows,
    negotiator: ProtoNegotiator,
    apis: DashMap<String, ApiHandler>,
    link: RwLock<Option<Arc<dyn SocketLink>>>,
    connect_lock: Mutex<()>,
    shutdown: CancellationToken,
    heartbeat: HeartbeatMonitor,
}

/// Close reason used when the application drops every handle.
const HANDLES_DROPPED: &str = "connection handle dropped";

/// Handle to one protocol connection. Clones share the same connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Shared>,
    _handles: Arc<HandleGuard>,
}

/// Shared by every [`Connection`] clone but never by background tasks, so
/// its drop marks the last application handle going away.
struct HandleGuard {
    shared: Arc<Shared>,
}

impl Drop for HandleGuard {
    fn drop(&mut self) {
        let state = self.shared.state.get();
        if state == ConnectionState::Created || state.is_shutting_down() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let shared = Arc::clone(&self.shared);
                runtime.spawn(async move {
                    shared
                        .terminate(CloseCause::Manual(Some(HANDLES_DROPPED.to_owned())))
                        .await;
                });
            }
            Err(_) => {
                // No runtime to close the link on; stop the tasks and fail
                // anything still waiting.
                self.shared.shutdown.cancel();
                self.shared.correlator.close_all(Some(HANDLES_DROPPED));
            }
        }
    }
}

impl Connection {
    /// Create a connection over a request-style transport.
    ///
    /// Such connections connect implicitly on first use and carry the
    /// schema fingerprint in an out-of-band header.
    #[must_use]
    pub fn http(transport: Arc<dyn RequestTransport>, config: ConnectionConfig) -> Self {
        Self::with_transport(Transport::Http(transport), config)
    }

    /// Create a connection over a socket-style transport.
    #[must_use]
    pub fn socket(transport: Arc<dyn SocketTransport>, config: ConnectionConfig) -> Self {
        Self::with_transport(Transport::Socket(transport), config)
    }

    fn with_transport(transport: Transport, config: ConnectionConfig) -> Self {
        let logger = config.effective_logger();
        let negotiator = ProtoNegotiator::new(
            config.proto_info.clone(),
            config.on_proto_mismatch.clone(),
            Arc::clone(&logger),
        );
        let inner = Arc::new(Shared {
            id: ConnectionId::next(),
            transport,
            dispatcher: MsgDispatcher::new(Arc::clone(&logger)),
            flows: ConnectionFlows::new(&logger),
            negotiator,
            logger,
            config,
            state: StateCell::new(),
            correlator: RequestCorrelator::new(),
            apis: DashMap::new(),
            link: RwLock::new(None),
            connect_lock: Mutex::new(()),
            shutdown: CancellationToken::new(),
            heartbeat: HeartbeatMonitor::default(),
        });
        Self {
            _handles: Arc::new(HandleGuard {
                shared: Arc::clone(&inner),
            }),
            inner,
        }
    }

    /// Identifier of this connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.inner.id }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState { self.inner.state.get() }

    /// Observe lifecycle changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> { self.inner.state.subscribe() }

    /// Interception pipelines of this connection.
    #[must_use]
    pub fn flows(&self) -> &ConnectionFlows { &self.inner.flows }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize { self.inner.correlator.pending_count() }

    /// Most recent schema fingerprint received from the peer.
    #[must_use]
    pub fn remote_proto_info(&self) -> Option<ProtoInfo> { self.inner.negotiator.remote() }

    /// Establish the connection.
    ///
    /// Idempotent while connecting or connected: concurrent callers wait for
    /// the attempt in progress and share its outcome.
    ///
    /// # Errors
    ///
    /// Fails with the pre-connect hook's error if one stops the attempt,
    /// `NetworkError` if the transport cannot be opened, and
    /// `ConnectionClosed` once the connection has closed. A failed attempt
    /// leaves the connection closed.
    pub async fn connect(&self) -> OpResult<()> {
        let span = tracing::info_span!("tsrpc.connect", connection = %self.inner.id);
        self.inner.connect().instrument(span).await
    }

    /// Call a remote API and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns the remote handler's wire-safe error, `TimeoutError`,
    /// `Cancelled`, `ConnectionClosed`, `NetworkError`, or whatever a flow
    /// hook decided.
    pub async fn call_api(&self, api_name: &str, body: Body, options: CallOptions) -> OpResult<Body> {
        let span = tracing::info_span!(
            "tsrpc.call_api",
            connection = %self.inner.id,
            api_name,
            sn = tracing::field::Empty
        );
        self.inner
            .call_api(api_name, body, options)
            .instrument(span)
            .await
    }

    /// Send a one-way message.
    ///
    /// # Errors
    ///
    /// Fails when the connection is not open, a flow hook stops the message,
    /// or the transport rejects the payload.
    pub async fn send_msg(&self, msg_name: &str, body: Body) -> OpResult<()> {
        let span = tracing::info_span!("tsrpc.send_msg", connection = %self.inner.id, msg_name);
        self.inner.send_msg(msg_name, body).instrument(span).await
    }

    /// Register `handler` for inbound messages named `msg_name`.
    ///
    /// Returns the handler so it can later be passed to
    /// [`unlisten_msg`](Self::unlisten_msg). Registering the same handler
    /// twice has no effect.
    pub fn listen_msg(&self, msg_name: &str, handler: MsgHandler) -> MsgHandler {
        self.inner
            .dispatcher
            .add_handler(msg_name, Arc::clone(&handler));
        handler
    }

    /// Remove one handler, or all handlers of `msg_name` when `handler` is
    /// `None`. Returns the number removed.
    pub fn unlisten_msg(&self, msg_name: &str, handler: Option<&MsgHandler>) -> usize {
        self.inner.dispatcher.remove_handler(msg_name, handler)
    }

    /// Serve inbound requests for `api_name` with `handler`.
    ///
    /// # Errors
    ///
    /// Returns an `InternalError` if the API already has a handler.
    pub fn implement_api(&self, api_name: &str, handler: ApiHandler) -> OpResult<()> {
        match self.inner.apis.entry(api_name.to_owned()) {
            Entry::Occupied(_) => Err(TsrpcError::internal(format!(
                "API {api_name} already has a handler"
            ))),
            Entry::Vacant(entry) => {
                entry.insert(handler);
                Ok(())
            }
        }
    }

    /// Close the connection.
    ///
    /// Every outstanding request resolves with `ConnectionClosed`. Closing
    /// an already closed connection does nothing.
    pub async fn close(&self, reason: Option<&str>) {
        let span = tracing::info_span!("tsrpc.close", connection = %self.inner.id);
        self.inner
            .terminate(CloseCause::Manual(reason.map(str::to_owned)))
            .instrument(span)
            .await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let transport = match self.inner.transport {
            Transport::Http(_) => "http",
            Transport::Socket(_) => "socket",
        };
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("transport", &transport)
            .field("state", &self.state())
            .field("pending", &self.pending_requests())
            .finish_non_exhaustive()
    }
}

impl Shared {
    async fn connect(self: &Arc<Self>) -> OpResult<()> {
        let _serialised = self.connect_lock.lock().await;
        match self.state.get() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Closing | ConnectionState::Closed => {
                return Err(TsrpcError::connection_closed(None));
            }
            ConnectionState::Created | ConnectionState::Connecting => {}
        }
        self.state
            .transition(|s| s == ConnectionState::Created, ConnectionState::Connecting);

        let ctx = ConnectContext {
            connection_id: self.id,
        };
        if let FlowControl::Stop(result) = self.flows.pre_connect.exec(ctx).await {
            let err = result
                .err()
                .unwrap_or_else(|| TsrpcError::internal("connect aborted by preConnect hook"));
            self.terminate(CloseCause::Failure(err.clone())).await;
            return Err(err);
        }

        let opened = match &self.transport {
            Transport::Http(_) => Ok(None),
            Transport::Socket(transport) => self.open_socket(Arc::clone(transport)).await.map(Some),
        };
        let socket = match opened {
            Ok(socket) => socket,
            Err(err) => {
                self.logger
                    .error(format_args!("[{}] connect failed: {err}", self.id));
                self.terminate(CloseCause::Failure(err.clone())).await;
                return Err(err);
            }
        };

        if let Some((link, events, early)) = socket {
            *self.link.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&link));
            if self.shutdown.is_cancelled() {
                // `close` ran before the link was stored.
                let stored = self
                    .link
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(link) = stored {
                    link.close(Some("closed while connecting".to_owned()), None).await;
                }
                return Err(TsrpcError::connection_closed(Some("closed while connecting")));
            }
            drop(link);
            tokio::spawn(Arc::clone(self).run_reader(events, early));
            if let Some(config) = self.config.heartbeat {
                tokio::spawn(Arc::clone(self).run_heartbeat(config));
            }
        }

        if !self
            .state
            .transition(|s| s == ConnectionState::Connecting, ConnectionState::Connected)
        {
            return Err(TsrpcError::connection_closed(Some("closed while connecting")));
        }
        self.logger.log(format_args!("[{}] connected", self.id));
        Ok(())
    }

    /// Open the socket transport, bounded by the connect timeout and by
    /// `close`.
    async fn open_socket(&self, transport: Arc<dyn SocketTransport>) -> OpResult<OpenedSocket> {
        let bounded = async {
            match self.config.connect_timeout {
                Some(limit) => tokio::time::timeout(limit, self.start_socket(transport))
                    .await
                    .unwrap_or_else(|_| Err(TsrpcError::network("connect timed out"))),
                None => self.start_socket(transport).await,
            }
        };

        tokio::select! {
            result = bounded => result,
            () = self.shutdown.cancelled() => {
                Err(TsrpcError::connection_closed(Some("closed while connecting")))
            }
        }
    }

    /// Start the socket transport and wait for it to report `Open`.
    ///
    /// Messages arriving before `Open` are kept for the reader.
    async fn start_socket(&self, transport: Arc<dyn SocketTransport>) -> OpResult<OpenedSocket> {
        let (tx, mut events) = mpsc::unbounded_channel();
        let link: Arc<dyn SocketLink> =
            Arc::from(transport.connect(self.config.socket_options.clone(), tx).await?);
        let mut early = Vec::new();
        loop {
            match events.recv().await {
                Some(SocketEvent::Open) => return Ok((link, events, early)),
                Some(SocketEvent::Message(payload)) => early.push(payload),
                Some(SocketEvent::Close { code, reason }) => {
                    return Err(TsrpcError::network(format!(
                        "transport closed while connecting (code {code:?}, reason {reason:?})"
                    )));
                }
                Some(SocketEvent::Error(message)) => return Err(TsrpcError::network(message)),
                None => return Err(TsrpcError::network("transport dropped its event channel")),
            }
        }
    }

    /// Move to `Closed`, sweeping outstanding requests. Runs once.
    async fn terminate(&self, cause: CloseCause) {
        if !self
            .state
            .transition(|s| !s.is_shutting_down(), ConnectionState::Closing)
        {
            return;
        }
        let reason = cause.reason();
        self.shutdown.cancel();

        let swept = self.correlator.close_all(reason.as_deref());
        let link = self
            .link
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(link) = link {
            if !matches!(cause, CloseCause::Remote { .. }) {
                link.close(reason.clone(), None).await;
            }
        }
        self.state.transition(|_| true, ConnectionState::Closed);

        match &cause {
            CloseCause::Failure(err) => {
                crate::metrics::inc_errors(err.kind);
                self.logger
                    .error(format_args!("[{}] connection lost: {err}", self.id));
            }
            CloseCause::Manual(_) | CloseCause::Remote { .. } => self.logger.log(format_args!(
                "[{}] disconnected ({})",
                self.id,
                reason.as_deref().unwrap_or("no reason")
            )),
        }
        tracing::debug!(swept, "pending requests swept on close");

        let ctx = DisconnectContext {
            reason,
            manual: matches!(cause, CloseCause::Manual(_)),
        };
        let _ = self.flows.post_disconnect.exec(ctx).await;
    }

    /// Clone out the current socket link.
    fn current_link(&self) -> Option<Arc<dyn SocketLink>> {
        self.link
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
