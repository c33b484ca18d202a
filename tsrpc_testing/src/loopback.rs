//! Two socket transports wired back to back.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tsrpc::{
    OpResult,
    Payload,
    TsrpcError,
    transport::{SocketEvent, SocketEvents, SocketLink, SocketOptions, SocketTransport},
};

type Slot = Arc<Mutex<Option<SocketEvents>>>;

/// One side of a [`socket_pair`].
///
/// Connecting registers this side's event channel; payloads sent on the
/// link are delivered to the other side once it has connected too.
pub struct LoopbackTransport {
    local: Slot,
    remote: Slot,
}

/// Create two transports whose links deliver to each other.
#[must_use]
pub fn socket_pair() -> (Arc<LoopbackTransport>, Arc<LoopbackTransport>) {
    let a: Slot = Arc::default();
    let b: Slot = Arc::default();
    (
        Arc::new(LoopbackTransport {
            local: Arc::clone(&a),
            remote: Arc::clone(&b),
        }),
        Arc::new(LoopbackTransport {
            local: b,
            remote: a,
        }),
    )
}

fn deliver(slot: &Slot, event: SocketEvent) -> bool {
    slot.lock()
        .expect("loopback lock")
        .as_ref()
        .is_some_and(|events| events.send(event).is_ok())
}

#[async_trait]
impl SocketTransport for LoopbackTransport {
    async fn connect(
        &self,
        _options: SocketOptions,
        events: SocketEvents,
    ) -> OpResult<Box<dyn SocketLink>> {
        let _ = events.send(SocketEvent::Open);
        *self.local.lock().expect("loopback lock") = Some(events);
        Ok(Box::new(LoopbackLink {
            local: Arc::clone(&self.local),
            remote: Arc::clone(&self.remote),
        }))
    }
}

struct LoopbackLink {
    local: Slot,
    remote: Slot,
}

#[async_trait]
impl SocketLink for LoopbackLink {
    async fn send(&self, payload: Payload) -> OpResult<()> {
        if deliver(&self.remote, SocketEvent::Message(payload)) {
            Ok(())
        } else {
            Err(TsrpcError::network("loopback peer is not connected"))
        }
    }

    async fn close(&self, reason: Option<String>, code: Option<u16>) {
        self.local.lock().expect("loopback lock").take();
        let _ = deliver(&self.remote, SocketEvent::Close { code, reason });
        self.remote.lock().expect("loopback lock").take();
    }
}
