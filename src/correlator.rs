//! Request/response correlation.
//!
//! [`RequestCorrelator`] owns the pending-request table of one connection.
//! Every registered request is resolved exactly once, by whichever of
//! response, timeout, cancellation or connection close gets there first.
//! Exclusivity comes from atomic removal: only the path that removes the
//! entry from the table may fulfil it.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        Weak,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    task::{Context, Poll},
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::{sync::oneshot, task::AbortHandle};

use crate::{
    envelope::Body,
    error::{OpResult, TsrpcError},
    metrics,
};

struct PendingRequest {
    api_name: String,
    created_at: Instant,
    timer: Option<AbortHandle>,
    slot: oneshot::Sender<OpResult<Body>>,
}

#[derive(Default)]
struct Shared {
    pending: DashMap<u32, PendingRequest>,
    next_sn: AtomicU32,
    closed: AtomicBool,
}

impl Shared {
    /// Remove `sn` and fulfil it. Returns `false` if it was not pending.
    fn settle(&self, sn: u32, result: OpResult<Body>) -> bool {
        let Some((_, request)) = self.pending.remove(&sn) else {
            return false;
        };
        metrics::dec_pending();
        if let Some(timer) = &request.timer {
            timer.abort();
        }
        tracing::debug!(
            sn,
            api_name = %request.api_name,
            elapsed_ms = u64::try_from(request.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            ok = result.is_ok(),
            "request settled"
        );
        // The caller may have stopped waiting.
        let _ = request.slot.send(result);
        true
    }

    /// Remove `sn` without fulfilling it.
    fn discard(&self, sn: u32) {
        if let Some((_, request)) = self.pending.remove(&sn) {
            metrics::dec_pending();
            if let Some(timer) = request.timer {
                timer.abort();
            }
        }
    }
}

/// Pending-request table of one connection.
///
/// Cloning yields another handle to the same table.
#[derive(Clone, Default)]
pub struct RequestCorrelator {
    inner: Arc<Shared>,
}

impl RequestCorrelator {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Allocate a sequence number and register a pending request.
    ///
    /// Sequence numbers come from a wrapping counter that never yields `0`
    /// and skips values still pending. When `timeout` is set a timer task
    /// resolves the request with `TimeoutError` on expiry; it must therefore
    /// be called from within a Tokio runtime.
    ///
    /// After [`close_all`](Self::close_all) the returned call is already
    /// resolved with `ConnectionClosed`.
    pub fn register(&self, api_name: &str, timeout: Option<Duration>) -> (u32, PendingCall) {
        let (slot, rx) = oneshot::channel();
        if self.inner.closed.load(Ordering::SeqCst) {
            let _ = slot.send(Err(TsrpcError::connection_closed(None)));
            return (0, PendingCall::detached(rx));
        }

        let mut slot = Some(slot);
        let sn = loop {
            let sn = self.inner.next_sn.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if sn == 0 {
                continue;
            }
            if let Entry::Vacant(entry) = self.inner.pending.entry(sn) {
                if let Some(slot) = slot.take() {
                    entry.insert(PendingRequest {
                        api_name: api_name.to_owned(),
                        created_at: Instant::now(),
                        timer: None,
                        slot,
                    });
                }
                break sn;
            }
        };
        metrics::inc_pending();

        if let Some(timeout) = timeout {
            self.arm_timer(sn, timeout);
        }

        // A close racing with this registration may have swept before the
        // insert became visible.
        if self.inner.closed.load(Ordering::SeqCst) {
            self.inner
                .settle(sn, Err(TsrpcError::connection_closed(None)));
        }

        (
            sn,
            PendingCall {
                sn,
                rx,
                owner: Arc::downgrade(&self.inner),
            },
        )
    }

    fn arm_timer(&self, sn: u32, timeout: Duration) {
        let owner = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = owner.upgrade() {
                if shared.settle(sn, Err(TsrpcError::timeout(timeout))) {
                    tracing::debug!(sn, ?timeout, "request timed out");
                }
            }
        })
        .abort_handle();

        match self.inner.pending.get_mut(&sn) {
            Some(mut request) => request.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Fulfil a pending request. Unknown or already settled `sn`s are
    /// ignored and yield `false`.
    pub fn resolve(&self, sn: u32, result: OpResult<Body>) -> bool {
        let settled = self.inner.settle(sn, result);
        if !settled {
            tracing::debug!(sn, "ignoring result for unknown sn");
        }
        settled
    }

    /// Resolve a pending request with `Cancelled`.
    pub fn cancel(&self, sn: u32) -> bool { self.inner.settle(sn, Err(TsrpcError::cancelled())) }

    /// Resolve every pending request with `ConnectionClosed` and refuse
    /// further registrations. Returns the number of requests swept.
    pub fn close_all(&self, reason: Option<&str>) -> usize {
        self.inner.closed.store(true, Ordering::SeqCst);
        let sns: Vec<u32> = self.inner.pending.iter().map(|entry| *entry.key()).collect();
        let mut swept = 0;
        for sn in sns {
            if self
                .inner
                .settle(sn, Err(TsrpcError::connection_closed(reason)))
            {
                swept += 1;
            }
        }
        swept
    }

    /// Returns `true` while `sn` awaits its result.
    #[must_use]
    pub fn is_pending(&self, sn: u32) -> bool { self.inner.pending.contains_key(&sn) }

    /// Number of outstanding requests.
    #[must_use]
    pub fn pending_count(&self) -> usize { self.inner.pending.len() }

    /// Returns `true` once [`close_all`](Self::close_all) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::SeqCst) }
}

impl std::fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCorrelator")
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Awaitable result of a registered request.
///
/// Dropping it before resolution releases the `sn` without fulfilling it.
#[must_use = "a pending call does nothing unless awaited"]
pub struct PendingCall {
    sn: u32,
    rx: oneshot::Receiver<OpResult<Body>>,
    owner: Weak<Shared>,
}

impl PendingCall {
    fn detached(rx: oneshot::Receiver<OpResult<Body>>) -> Self {
        Self {
            sn: 0,
            rx,
            owner: Weak::new(),
        }
    }

    /// Sequence number of the request.
    #[must_use]
    pub fn sn(&self) -> u32 { self.sn }
}

impl Future for PendingCall {
    type Output = OpResult<Body>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or_else(|_| Err(TsrpcError::connection_closed(None))))
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if let Some(shared) = self.owner.upgrade() {
            shared.discard(self.sn);
        }
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("sn", &self.sn)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
