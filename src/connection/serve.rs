//! Serving inbound requests with registered API handlers.

use std::{future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};

use super::Shared;
use crate::{
    classify::{HandlerError, classify_handler_error, classify_panic, redact},
    envelope::{Body, Envelope, Payload},
    error::TsrpcError,
    metrics,
    panic::catch_panic,
    proto_info::ProtoInfo,
};

/// Inbound request handed to an [`ApiHandler`].
#[derive(Clone, Debug, PartialEq)]
pub struct ApiCall {
    /// Sequence number chosen by the caller.
    pub sn: u32,
    /// API being called.
    pub api_name: String,
    /// Request body.
    pub body: Body,
}

/// Handler serving one API.
pub type ApiHandler =
    Arc<dyn Fn(ApiCall) -> BoxFuture<'static, Result<Body, HandlerError>> + Send + Sync>;

/// Wrap an async closure as an [`ApiHandler`].
///
/// # Examples
///
/// ```
/// use tsrpc::{ApiCall, HandlerError, api_handler};
///
/// let echo = api_handler(|call: ApiCall| async move { Ok(call.body) });
/// let reject = api_handler(|_call: ApiCall| async move {
///     Err(HandlerError::api("Invalid username"))
/// });
/// # let _ = (echo, reject);
/// ```
pub fn api_handler<F, Fut>(f: F) -> ApiHandler
where
    F: Fn(ApiCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Body, HandlerError>> + Send + 'static,
{
    Arc::new(move |call| f(call).boxed())
}

impl Shared {
    /// Run the handler for an inbound request and send its response.
    ///
    /// Failures are logged in full and answered with their wire-safe form.
    pub(super) async fn serve_request(
        self: Arc<Self>,
        sn: u32,
        api_name: String,
        body: Body,
        proto_info: Option<ProtoInfo>,
    ) {
        let reply_info = self.negotiator.reply_for(proto_info.as_ref());
        let handler = self.apis.get(&api_name).map(|entry| Arc::clone(entry.value()));

        let result = match handler {
            None => Err(TsrpcError::api(format!("Unhandled API: {api_name}"))),
            Some(handler) => {
                let call = ApiCall {
                    sn,
                    api_name: api_name.clone(),
                    body,
                };
                let classified = match catch_panic(async move { handler(call).await }).await {
                    Ok(Ok(body)) => return self.respond(sn, Ok(body), reply_info).await,
                    Ok(Err(err)) => classify_handler_error(err),
                    Err(panic) => classify_panic(&panic),
                };
                metrics::inc_errors(classified.local.kind);
                self.logger.error(format_args!(
                    "[{}] API {api_name} #{sn} failed: {}",
                    self.id, classified.local
                ));
                Err(classified.wire)
            }
        };
        self.respond(sn, result, reply_info).await;
    }

    /// Send the response to request `sn`.
    ///
    /// A successful result that cannot be encoded or is rejected by
    /// `preSendData` is answered with the [`redact`]ed failure instead, so the
    /// caller is not left waiting for its timeout.
    async fn respond(&self, sn: u32, result: Result<Body, TsrpcError>, proto_info: Option<ProtoInfo>) {
        let succeeded = result.is_ok();
        let response = response_envelope(sn, result, proto_info.clone());
        let err = match self.prepare(&response, Some(sn)).await {
            Ok(payload) => return self.deliver(sn, payload).await,
            Err(err) => err,
        };
        self.logger
            .error(format_args!("[{}] failed to prepare response #{sn}: {err}", self.id));
        if !succeeded {
            return;
        }

        let fallback = response_envelope(sn, Err(redact(&err)), proto_info);
        match self.prepare(&fallback, Some(sn)).await {
            Ok(payload) => self.deliver(sn, payload).await,
            Err(err) => self.logger.error(format_args!(
                "[{}] failed to prepare fallback response #{sn}: {err}",
                self.id
            )),
        }
    }

    async fn deliver(&self, sn: u32, payload: Option<Payload>) {
        let Some(payload) = payload else {
            return;
        };
        if let Err(err) = self.send_over_link(payload).await {
            self.logger
                .error(format_args!("[{}] failed to send response #{sn}: {err}", self.id));
        }
    }
}

fn response_envelope(sn: u32, result: Result<Body, TsrpcError>, proto_info: Option<ProtoInfo>) -> Envelope {
    match result {
        Ok(body) => Envelope::Response {
            sn,
            body,
            error: None,
            proto_info,
        },
        Err(error) => Envelope::Response {
            sn,
            body: Body::empty(),
            error: Some(error),
            proto_info,
        },
    }
}
