//! Connection configuration.
//!
//! [`ConnectionConfig`] gathers everything a connection needs besides its
//! transport: timeouts, heartbeat, codec, logging, the local schema
//! fingerprint and the optional service descriptor. [`CallOptions`] tunes a
//! single [`crate::Connection::call_api`] invocation.

use std::{fmt, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    codec::{CodecKind, EnvelopeCodec},
    logging::{LogLevel, Logger, TracingLogger, filter_logger},
    proto_info::{MismatchHandler, ProtoInfo, ProtoMismatch},
    service::ServiceMap,
    transport::{RequestOptions, SocketOptions},
};

/// Default timeout applied to API calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

/// Liveness probing of socket connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Delay between probes.
    pub interval: Duration,
    /// How long to wait for a probe's reply before closing the connection.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Settings of one connection.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use tsrpc::{
///     config::{ConnectionConfig, HeartbeatConfig},
///     codec::CodecKind,
///     logging::LogLevel,
/// };
///
/// let config = ConnectionConfig::default()
///     .with_timeout(Some(Duration::from_secs(2)))
///     .with_heartbeat(Some(HeartbeatConfig::default()))
///     .with_codec_kind(CodecKind::Binary)
///     .with_log_level(LogLevel::Warn);
/// assert_eq!(config.timeout, Some(Duration::from_secs(2)));
/// ```
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Default call timeout; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Limit on socket connection establishment.
    pub connect_timeout: Option<Duration>,
    /// Heartbeat settings; socket connections only.
    pub heartbeat: Option<HeartbeatConfig>,
    /// Local schema fingerprint advertised to the peer.
    pub proto_info: Option<ProtoInfo>,
    /// Envelope codec.
    pub codec: Arc<dyn EnvelopeCodec>,
    /// Application logger, before level filtering.
    pub logger: Arc<dyn Logger>,
    /// Minimum level forwarded to `logger`.
    pub log_level: LogLevel,
    /// Names known to be served by the peer.
    pub service: Option<ServiceMap>,
    /// Base options of request-style exchanges.
    pub request_options: RequestOptions,
    /// Options of socket-style connection attempts.
    pub socket_options: SocketOptions,
    /// Callback notified of schema fingerprint mismatches.
    pub on_proto_mismatch: Option<MismatchHandler>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_CALL_TIMEOUT),
            connect_timeout: None,
            heartbeat: None,
            proto_info: None,
            codec: CodecKind::default().build(),
            logger: Arc::new(TracingLogger),
            log_level: LogLevel::default(),
            service: None,
            request_options: RequestOptions::default(),
            socket_options: SocketOptions::default(),
            on_proto_mismatch: None,
        }
    }
}

impl ConnectionConfig {
    /// Set the default call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bound socket connection establishment.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Enable or disable heartbeats.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: Option<HeartbeatConfig>) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Advertise `info` as the local schema fingerprint.
    #[must_use]
    pub fn with_proto_info(mut self, info: ProtoInfo) -> Self {
        self.proto_info = Some(info);
        self
    }

    /// Use one of the built-in codecs.
    #[must_use]
    pub fn with_codec_kind(mut self, kind: CodecKind) -> Self {
        self.codec = kind.build();
        self
    }

    /// Use a custom codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn EnvelopeCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Replace the application logger.
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Set the minimum level forwarded to the logger.
    #[must_use]
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Reject calls to APIs missing from `service`.
    #[must_use]
    pub fn with_service(mut self, service: ServiceMap) -> Self {
        self.service = Some(service);
        self
    }

    /// Base options of request-style exchanges.
    #[must_use]
    pub fn with_request_options(mut self, options: RequestOptions) -> Self {
        self.request_options = options;
        self
    }

    /// Options of socket-style connection attempts.
    #[must_use]
    pub fn with_socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = options;
        self
    }

    /// Notify `handler` whenever the peer's schema fingerprint differs.
    #[must_use]
    pub fn on_proto_info_mismatch<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ProtoMismatch) + Send + Sync + 'static,
    {
        self.on_proto_mismatch = Some(Arc::new(handler));
        self
    }

    /// Logger with the configured level filter applied.
    #[must_use]
    pub fn effective_logger(&self) -> Arc<dyn Logger> {
        filter_logger(Arc::clone(&self.logger), self.log_level)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("heartbeat", &self.heartbeat)
            .field("proto_info", &self.proto_info)
            .field("log_level", &self.log_level)
            .field("service", &self.service)
            .field("request_options", &self.request_options)
            .field("socket_options", &self.socket_options)
            .finish_non_exhaustive()
    }
}

/// Per-call overrides.
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    /// Overrides the connection's default timeout when set.
    pub timeout: Option<Duration>,
    /// Cancels the call when triggered.
    pub cancel: Option<CancellationToken>,
}

impl CallOptions {
    /// Use `timeout` for this call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abort this call when `token` is cancelled.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}
