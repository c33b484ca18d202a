//! Liveness probing for socket connections.

use std::sync::{
    Arc,
    Mutex,
    PoisonError,
    atomic::{AtomicU32, Ordering},
};

use tokio::sync::oneshot;

use super::{CloseCause, Shared};
use crate::{
    config::HeartbeatConfig,
    envelope::Envelope,
    error::{OpResult, TsrpcError},
    metrics::{self, Direction},
};

/// Tracks the single outstanding probe of a connection.
#[derive(Default)]
pub(super) struct HeartbeatMonitor {
    next_sn: AtomicU32,
    awaiting: Mutex<Option<(u32, oneshot::Sender<()>)>>,
}

impl HeartbeatMonitor {
    fn arm(&self) -> (u32, oneshot::Receiver<()>) {
        let sn = self.next_sn.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let (tx, rx) = oneshot::channel();
        *self.awaiting.lock().unwrap_or_else(PoisonError::into_inner) = Some((sn, tx));
        (sn, rx)
    }

    /// Record the peer's reply to probe `sn`; stale replies are ignored.
    pub(super) fn acknowledge(&self, sn: u32) {
        let mut awaiting = self.awaiting.lock().unwrap_or_else(PoisonError::into_inner);
        if awaiting.as_ref().is_some_and(|(expected, _)| *expected == sn) {
            if let Some((_, tx)) = awaiting.take() {
                let _ = tx.send(());
            }
        } else {
            tracing::debug!(sn, "ignoring stale heartbeat reply");
        }
    }
}

impl Shared {
    /// Probe the peer every `interval`; a probe left unanswered for
    /// `timeout` closes the connection.
    pub(super) async fn run_heartbeat(self: Arc<Self>, config: HeartbeatConfig) {
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return,
                () = tokio::time::sleep(config.interval) => {}
            }

            let (sn, reply) = self.heartbeat.arm();
            if let Err(err) = self.send_heartbeat(sn, false).await {
                self.terminate(CloseCause::Failure(err)).await;
                return;
            }

            let answered = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return,
                answered = tokio::time::timeout(config.timeout, reply) => answered,
            };
            if !matches!(answered, Ok(Ok(()))) {
                let err = TsrpcError::network("Heartbeat timeout")
                    .with_info(serde_json::json!({ "sn": sn }));
                self.terminate(CloseCause::Failure(err)).await;
                return;
            }
        }
    }

    /// Send a heartbeat directly to the link, bypassing flows.
    pub(super) async fn send_heartbeat(&self, sn: u32, reply: bool) -> OpResult<()> {
        let payload = self
            .config
            .codec
            .encode(&Envelope::Heartbeat { sn, reply })?;
        let link = self
            .current_link()
            .ok_or_else(|| TsrpcError::network("connection is not open"))?;
        link.send(payload).await?;
        metrics::inc_envelopes(Direction::Outbound);
        Ok(())
    }
}
