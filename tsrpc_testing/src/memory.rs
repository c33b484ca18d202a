//! Socket transport whose far end is scripted by the test.

use std::{
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tsrpc::{
    Envelope,
    EnvelopeCodec,
    JsonCodec,
    OpResult,
    Payload,
    TsrpcError,
    transport::{SocketEvent, SocketEvents, SocketLink, SocketOptions, SocketTransport},
};

#[derive(Default)]
struct PeerState {
    events: Mutex<Option<SocketEvents>>,
    connects: AtomicUsize,
    options: Mutex<Vec<SocketOptions>>,
    closes: Mutex<Vec<(Option<String>, Option<u16>)>>,
    refuse: AtomicBool,
}

/// [`SocketTransport`] backed by channels.
///
/// Payloads sent by the connection surface on the paired [`MemoryPeer`].
pub struct MemorySocketTransport {
    state: Arc<PeerState>,
    sent: mpsc::UnboundedSender<Payload>,
    auto_open: bool,
}

/// Far end of a [`MemorySocketTransport`].
pub struct MemoryPeer {
    state: Arc<PeerState>,
    sent: mpsc::UnboundedReceiver<Payload>,
}

/// Create a transport that reports `Open` as soon as it is connected.
#[must_use]
pub fn memory_socket() -> (Arc<MemorySocketTransport>, MemoryPeer) { build(true) }

impl MemorySocketTransport {
    /// Create a transport that stays pending until [`MemoryPeer::open`].
    #[must_use]
    pub fn manual_open() -> (Arc<Self>, MemoryPeer) { build(false) }
}

fn build(auto_open: bool) -> (Arc<MemorySocketTransport>, MemoryPeer) {
    let state = Arc::new(PeerState::default());
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = Arc::new(MemorySocketTransport {
        state: Arc::clone(&state),
        sent: tx,
        auto_open,
    });
    (transport, MemoryPeer { state, sent: rx })
}

#[async_trait]
impl SocketTransport for MemorySocketTransport {
    async fn connect(
        &self,
        options: SocketOptions,
        events: SocketEvents,
    ) -> OpResult<Box<dyn SocketLink>> {
        self.state.options.lock().expect("options lock").push(options);
        if self.state.refuse.load(Ordering::SeqCst) {
            self.state.connects.fetch_add(1, Ordering::SeqCst);
            return Err(TsrpcError::network("connection refused"));
        }
        if self.auto_open {
            let _ = events.send(SocketEvent::Open);
        }
        *self.state.events.lock().expect("events lock") = Some(events);
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryLink {
            state: Arc::clone(&self.state),
            sent: self.sent.clone(),
        }))
    }
}

struct MemoryLink {
    state: Arc<PeerState>,
    sent: mpsc::UnboundedSender<Payload>,
}

#[async_trait]
impl SocketLink for MemoryLink {
    async fn send(&self, payload: Payload) -> OpResult<()> {
        self.sent
            .send(payload)
            .map_err(|_| TsrpcError::network("memory peer dropped"))
    }

    async fn close(&self, reason: Option<String>, code: Option<u16>) {
        self.state
            .closes
            .lock()
            .expect("closes lock")
            .push((reason, code));
    }
}

impl MemoryPeer {
    /// Make the next connection attempt fail to start.
    pub fn refuse_connections(&self) { self.state.refuse.store(true, Ordering::SeqCst); }

    /// Deliver `event` to the connection.
    ///
    /// # Panics
    ///
    /// Panics if the connection has not attempted to connect.
    pub fn emit(&self, event: SocketEvent) {
        let events = self.state.events.lock().expect("events lock");
        let events = events.as_ref().expect("connection has not connected");
        // The reader may already have finished; tests assert on effects.
        let _ = events.send(event);
    }

    /// Report the link as open.
    pub fn open(&self) { self.emit(SocketEvent::Open); }

    /// Deliver `envelope` encoded with [`JsonCodec`].
    pub fn push(&self, envelope: &Envelope) { self.push_with(&JsonCodec, envelope); }

    /// Deliver `envelope` encoded with `codec`.
    ///
    /// # Panics
    ///
    /// Panics if `envelope` cannot be encoded.
    pub fn push_with(&self, codec: &dyn EnvelopeCodec, envelope: &Envelope) {
        let payload = codec.encode(envelope).expect("encode envelope");
        self.emit(SocketEvent::Message(payload));
    }

    /// Deliver raw bytes or text as received data.
    pub fn push_raw(&self, payload: Payload) { self.emit(SocketEvent::Message(payload)); }

    /// Close the link from the peer's side.
    pub fn close(&self, code: Option<u16>, reason: Option<&str>) {
        self.emit(SocketEvent::Close {
            code,
            reason: reason.map(str::to_owned),
        });
    }

    /// Next payload written by the connection, waiting at most one second.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives in time or the transport was dropped.
    pub async fn recv_payload(&mut self) -> Payload {
        tokio::time::timeout(Duration::from_secs(1), self.sent.recv())
            .await
            .expect("connection sent nothing")
            .expect("transport dropped")
    }

    /// Next envelope written by the connection, decoded with [`JsonCodec`].
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives in time or the payload does not decode.
    pub async fn recv(&mut self) -> Envelope { self.recv_with(&JsonCodec).await }

    /// Next envelope written by the connection, decoded with `codec`.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives in time or the payload does not decode.
    pub async fn recv_with(&mut self, codec: &dyn EnvelopeCodec) -> Envelope {
        let payload = self.recv_payload().await;
        codec.decode(&payload).expect("decode envelope")
    }

    /// Payload already written by the connection, if any.
    pub fn try_recv(&mut self) -> Option<Payload> { self.sent.try_recv().ok() }

    /// Number of connection attempts made.
    #[must_use]
    pub fn connect_count(&self) -> usize { self.state.connects.load(Ordering::SeqCst) }

    /// Options passed to each connection attempt.
    #[must_use]
    pub fn connect_options(&self) -> Vec<SocketOptions> {
        self.state.options.lock().expect("options lock").clone()
    }

    /// `(reason, code)` of every close initiated by the connection.
    #[must_use]
    pub fn closes(&self) -> Vec<(Option<String>, Option<u16>)> {
        self.state.closes.lock().expect("closes lock").clone()
    }
}
