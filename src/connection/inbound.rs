//! Inbound envelope processing.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{CloseCause, Shared};
use crate::{
    envelope::{Envelope, Payload},
    error::{ErrorKind, TsrpcError},
    flow::{FlowControl, ReceivedDataContext},
    metrics::{self, Direction},
    transport::SocketEvent,
};

impl Shared {
    /// Drain socket events in arrival order until the link or the
    /// connection closes.
    pub(super) async fn run_reader(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<SocketEvent>,
        early: Vec<Payload>,
    ) {
        for payload in early {
            self.handle_payload(&payload).await;
        }

        loop {
            let event = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Some(SocketEvent::Message(payload)) => self.handle_payload(&payload).await,
                Some(SocketEvent::Open) => tracing::debug!("ignoring duplicate open event"),
                Some(SocketEvent::Close { code, reason }) => {
                    self.terminate(CloseCause::Remote { code, reason }).await;
                    break;
                }
                Some(SocketEvent::Error(message)) => {
                    self.terminate(CloseCause::Failure(TsrpcError::network(message)))
                        .await;
                    break;
                }
                None => {
                    self.terminate(CloseCause::Failure(TsrpcError::network(
                        "transport dropped its event channel",
                    )))
                    .await;
                    break;
                }
            }
        }
        tracing::debug!(connection = %self.id, "reader finished");
    }

    /// Decode one payload; malformed payloads are logged and dropped.
    async fn handle_payload(self: &Arc<Self>, payload: &Payload) {
        metrics::inc_envelopes(Direction::Inbound);
        match self.config.codec.decode(payload) {
            Ok(envelope) => self.handle_envelope(envelope).await,
            Err(err) => {
                metrics::inc_errors(ErrorKind::DecodeError);
                self.logger.warn(format_args!(
                    "[{}] dropping malformed payload ({} bytes): {err}",
                    self.id,
                    payload.len()
                ));
            }
        }
    }

    pub(super) async fn handle_envelope(self: &Arc<Self>, envelope: Envelope) {
        let envelope = match self
            .flows
            .post_received_data
            .exec(ReceivedDataContext { envelope })
            .await
        {
            FlowControl::Continue(ctx) => ctx.envelope,
            FlowControl::Stop(_) => return,
        };

        match envelope {
            Envelope::Response {
                sn,
                body,
                error,
                proto_info,
            } => {
                if let Some(info) = &proto_info {
                    self.negotiator.observe_remote(info);
                }
                let result = error.map_or(Ok(body), Err);
                if !self.correlator.resolve(sn, result) {
                    self.logger.debug(format_args!(
                        "[{}] response #{sn} matches no pending request",
                        self.id
                    ));
                }
            }
            Envelope::Message { msg_name, body } => {
                if self.dispatcher.dispatch(&msg_name, body) == 0 {
                    self.logger
                        .debug(format_args!("[{}] no handler for message {msg_name}", self.id));
                }
            }
            Envelope::Request {
                sn,
                api_name,
                body,
                proto_info,
            } => {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.serve_request(sn, api_name, body, proto_info).await });
            }
            Envelope::Heartbeat { sn, reply: false } => {
                if let Err(err) = self.send_heartbeat(sn, true).await {
                    self.logger
                        .warn(format_args!("[{}] failed to answer heartbeat #{sn}: {err}", self.id));
                }
            }
            Envelope::Heartbeat { sn, reply: true } => self.heartbeat.acknowledge(sn),
            Envelope::Custom { fields } => {
                tracing::debug!(fields = fields.len(), "ignoring custom envelope");
            }
        }
    }
}
