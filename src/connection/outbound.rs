//! Outbound calls and messages.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{ConnectionState, Shared, Transport};
use crate::{
    classify::classify_transport,
    config::CallOptions,
    correlator::PendingCall,
    envelope::{Body, Envelope, Payload},
    error::{OpResult, TsrpcError},
    flow::{CallApiContext, CallApiReturnContext, FlowControl, SendDataContext, SendMsgContext},
    metrics::{self, Direction},
    proto_info::{PROTO_INFO_HEADER, ProtoInfo},
    transport::{RequestTransport, TransportReply},
};

impl Shared {
    pub(super) async fn call_api(
        self: &Arc<Self>,
        api_name: &str,
        body: Body,
        options: CallOptions,
    ) -> OpResult<Body> {
        if let Some(service) = &self.config.service {
            if !service.has_api(api_name) {
                let err = TsrpcError::internal(format!("Invalid API name: {api_name}"))
                    .with_info(serde_json::json!({ "code": "INVALID_API_NAME" }));
                metrics::record_call::<Body>(&Err(err.clone()));
                return Err(err);
            }
        }
        if let Err(err) = self.ensure_connected().await {
            metrics::record_call::<Body>(&Err(err.clone()));
            return Err(err);
        }

        let timeout = options.timeout.or(self.config.timeout);
        let (sn, pending) = self.correlator.register(api_name, timeout);
        tracing::Span::current().record("sn", sn);
        self.logger
            .debug(format_args!("[ApiReq] #{sn} {api_name}"));

        let ctx = CallApiContext {
            sn,
            api_name: api_name.to_owned(),
            body,
            timeout,
        };
        let (body, transmit) = match self.flows.pre_call_api.exec(ctx).await {
            FlowControl::Continue(ctx) => (ctx.body, true),
            FlowControl::Stop(result) => {
                // Settle through the correlator so the sn is released once.
                self.correlator.resolve(sn, result);
                (Body::empty(), false)
            }
        };

        let result = if transmit {
            let request = Envelope::Request {
                sn,
                api_name: api_name.to_owned(),
                body: body.clone(),
                proto_info: None,
            };
            let send = self.transmit_request(sn, request);
            let wait = self.await_result(sn, pending, options.cancel);
            tokio::pin!(send, wait);
            let raced = tokio::select! {
                result = &mut wait => Some(result),
                () = &mut send => None,
            };
            match raced {
                Some(result) => result,
                None => wait.await,
            }
        } else {
            self.await_result(sn, pending, options.cancel).await
        };

        let ctx = CallApiReturnContext {
            sn,
            api_name: api_name.to_owned(),
            body,
            result,
        };
        let result = match self.flows.post_call_api_return.exec(ctx).await {
            FlowControl::Continue(ctx) => ctx.result,
            FlowControl::Stop(result) => result,
        };

        metrics::record_call(&result);
        match &result {
            Ok(_) => self.logger.debug(format_args!("[ApiRes] #{sn} {api_name}")),
            Err(err) => self
                .logger
                .log(format_args!("[ApiErr] #{sn} {api_name} {err}")),
        }
        result
    }

    /// Wait for a registered request, honouring the caller's cancellation.
    async fn await_result(
        &self,
        sn: u32,
        mut pending: PendingCall,
        cancel: Option<CancellationToken>,
    ) -> OpResult<Body> {
        let Some(token) = cancel else {
            return pending.await;
        };
        let raced = tokio::select! {
            result = &mut pending => Some(result),
            () = token.cancelled() => None,
        };
        match raced {
            Some(result) => result,
            None => {
                self.correlator.cancel(sn);
                pending.await
            }
        }
    }

    /// Deliver a request. Failures settle the request through the
    /// correlator; replies over request-style transports are routed inbound.
    async fn transmit_request(self: &Arc<Self>, sn: u32, request: Envelope) {
        match &self.transport {
            Transport::Socket(_) => {
                let mut request = request;
                if let Envelope::Request { proto_info, .. } = &mut request {
                    *proto_info = self.negotiator.outbound_for_request();
                }
                let outcome = match self.prepare(&request, Some(sn)).await {
                    Ok(Some(payload)) => self.send_over_link(payload).await,
                    Ok(None) => Ok(()),
                    Err(err) => Err(err),
                };
                if let Err(err) = outcome {
                    self.correlator.resolve(sn, Err(err));
                }
            }
            Transport::Http(transport) => {
                if let Err(err) = self.http_exchange(Arc::clone(transport), sn, &request).await {
                    self.correlator.resolve(sn, Err(err));
                }
            }
        }
    }

    async fn http_exchange(
        self: &Arc<Self>,
        transport: Arc<dyn RequestTransport>,
        sn: u32,
        request: &Envelope,
    ) -> OpResult<()> {
        let Some(payload) = self.prepare(request, Some(sn)).await? else {
            return Ok(());
        };
        let mut options = self.config.request_options.clone();
        if let Some(info) = self.negotiator.outbound_for_request() {
            options
                .headers
                .insert(PROTO_INFO_HEADER.to_owned(), info.to_header_value());
        }

        metrics::inc_envelopes(Direction::Outbound);
        let reply = transport.send(payload, options).await?;
        metrics::inc_envelopes(Direction::Inbound);
        self.observe_reply_header(&reply);

        match self.config.codec.decode(&reply.body) {
            Ok(Envelope::Response {
                body,
                error,
                proto_info,
                ..
            }) => {
                // Request-style replies answer exactly the request sent.
                let response = Envelope::Response {
                    sn,
                    body,
                    error,
                    proto_info,
                };
                self.handle_envelope(response).await;
                Ok(())
            }
            Ok(other) => Err(TsrpcError::decode(format!(
                "expected a res envelope in reply, got {}",
                other.kind().as_str()
            ))),
            Err(_) if !reply.is_success() => Err(classify_transport(
                format!("request failed with status {}", reply.status_code),
                Some(reply.status_code),
            )),
            Err(err) => Err(err.into()),
        }
    }

    fn observe_reply_header(&self, reply: &TransportReply) {
        let header = reply
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(PROTO_INFO_HEADER))
            .map(|(_, value)| value);
        let Some(value) = header else {
            return;
        };
        match ProtoInfo::from_header_value(value) {
            Ok(info) => {
                self.negotiator.observe_remote(&info);
            }
            Err(err) => self
                .logger
                .warn(format_args!("ignoring malformed {PROTO_INFO_HEADER} header: {err}")),
        }
    }

    pub(super) async fn send_msg(self: &Arc<Self>, msg_name: &str, body: Body) -> OpResult<()> {
        self.ensure_connected().await?;

        let ctx = SendMsgContext {
            msg_name: msg_name.to_owned(),
            body,
        };
        let ctx = match self.flows.pre_send_msg.exec(ctx).await {
            FlowControl::Continue(ctx) => ctx,
            FlowControl::Stop(result) => return result,
        };
        let message = Envelope::Message {
            msg_name: ctx.msg_name,
            body: ctx.body,
        };
        let Some(payload) = self.prepare(&message, None).await? else {
            return Ok(());
        };

        match &self.transport {
            Transport::Socket(_) => self.send_over_link(payload).await,
            Transport::Http(transport) => {
                metrics::inc_envelopes(Direction::Outbound);
                let reply = transport
                    .send(payload, self.config.request_options.clone())
                    .await?;
                if reply.is_success() {
                    Ok(())
                } else {
                    Err(classify_transport(
                        format!("message rejected with status {}", reply.status_code),
                        Some(reply.status_code),
                    ))
                }
            }
        }
    }

    /// Encode `envelope` and run the pre-send-data flow.
    ///
    /// `Ok(None)` means a hook consumed the payload.
    pub(super) async fn prepare(
        &self,
        envelope: &Envelope,
        sn: Option<u32>,
    ) -> OpResult<Option<Payload>> {
        let payload = self.config.codec.encode(envelope)?;
        match self
            .flows
            .pre_send_data
            .exec(SendDataContext { payload, sn })
            .await
        {
            FlowControl::Continue(ctx) => Ok(Some(ctx.payload)),
            FlowControl::Stop(Ok(())) => Ok(None),
            FlowControl::Stop(Err(err)) => Err(err),
        }
    }

    pub(super) async fn send_over_link(&self, payload: Payload) -> OpResult<()> {
        let link = self
            .current_link()
            .ok_or_else(|| TsrpcError::network("connection is not open"))?;
        link.send(payload).await?;
        metrics::inc_envelopes(Direction::Outbound);
        Ok(())
    }

    /// Request-style connections connect on first use; socket connections
    /// must be connected explicitly.
    async fn ensure_connected(self: &Arc<Self>) -> OpResult<()> {
        match (self.state.get(), &self.transport) {
            (ConnectionState::Connected, _) => Ok(()),
            (ConnectionState::Closing | ConnectionState::Closed, _) => {
                Err(TsrpcError::connection_closed(None))
            }
            (ConnectionState::Created | ConnectionState::Connecting, Transport::Http(_)) => {
                self.connect().await
            }
            (ConnectionState::Created | ConnectionState::Connecting, Transport::Socket(_)) => {
                Err(TsrpcError::network("connection is not open"))
            }
        }
    }
}
