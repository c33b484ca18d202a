//! Ordered interception pipelines.
//!
//! A [`Flow`] is an ordered list of async hooks sharing one context type.
//! [`Flow::exec`] threads the context through every hook in registration
//! order. Each hook either hands a (possibly modified) context to the next one
//! with [`FlowControl::Continue`] or ends the pipeline with
//! [`FlowControl::Stop`], whose result becomes the result of the guarded
//! operation. A hook that fails or panics stops the pipeline with a failure
//! that is logged at error level.
//!
//! [`ConnectionFlows`] groups the pipelines a connection consults.

use std::{
    fmt,
    future::Future,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use futures::{FutureExt, future::BoxFuture};

use crate::{
    classify::{HandlerError, classify_handler_error, classify_panic},
    connection::ConnectionId,
    envelope::{Body, Envelope, Payload},
    error::OpResult,
    logging::Logger,
    metrics,
    panic::catch_panic,
};

/// Outcome of a single hook.
#[derive(Debug)]
pub enum FlowControl<C, T> {
    /// Pass the context on to the next hook.
    Continue(C),
    /// Skip the remaining hooks; the guarded operation returns this result.
    Stop(OpResult<T>),
}

/// Registered hook.
pub type FlowHook<C, T> =
    Arc<dyn Fn(C) -> BoxFuture<'static, Result<FlowControl<C, T>, HandlerError>> + Send + Sync>;

/// Ordered hook pipeline for one interception point.
pub struct Flow<C, T> {
    name: &'static str,
    hooks: RwLock<Vec<FlowHook<C, T>>>,
    logger: Arc<dyn Logger>,
}

impl<C, T> Flow<C, T>
where
    C: Send + 'static,
    T: Send + 'static,
{
    /// Create an empty pipeline reporting failures to `logger`.
    #[must_use]
    pub fn new(name: &'static str, logger: Arc<dyn Logger>) -> Self {
        Self {
            name,
            hooks: RwLock::new(Vec::new()),
            logger,
        }
    }

    /// Pipeline name used in log lines.
    #[must_use]
    pub fn name(&self) -> &'static str { self.name }

    /// Append `hook`; it runs after every hook registered before it.
    pub fn push(&self, hook: FlowHook<C, T>) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    /// Append an async closure and return the stored hook for later removal.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use tsrpc::{
    ///     flow::{Flow, FlowControl, SendMsgContext},
    ///     logging::NoopLogger,
    /// };
    ///
    /// let flow: Flow<SendMsgContext, ()> = Flow::new("preSendMsg", Arc::new(NoopLogger));
    /// let hook = flow.push_fn(|ctx: SendMsgContext| async move { Ok(FlowControl::Continue(ctx)) });
    /// assert_eq!(flow.len(), 1);
    /// assert!(flow.remove(&hook));
    /// assert!(flow.is_empty());
    /// ```
    pub fn push_fn<F, Fut>(&self, f: F) -> FlowHook<C, T>
    where
        F: Fn(C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FlowControl<C, T>, HandlerError>> + Send + 'static,
    {
        let hook: FlowHook<C, T> = Arc::new(move |ctx| f(ctx).boxed());
        self.push(Arc::clone(&hook));
        hook
    }

    /// Remove a previously registered hook. Returns `false` if it was absent.
    pub fn remove(&self, hook: &FlowHook<C, T>) -> bool {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        let before = hooks.len();
        hooks.retain(|h| !Arc::ptr_eq(h, hook));
        hooks.len() != before
    }

    /// Remove every hook.
    pub fn clear(&self) { self.hooks.write().unwrap_or_else(PoisonError::into_inner).clear(); }

    /// Number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize { self.hooks.read().unwrap_or_else(PoisonError::into_inner).len() }

    /// Returns `true` when no hook is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Run every hook in order.
    ///
    /// Hooks registered while the pipeline runs take effect on the next run.
    pub async fn exec(&self, mut ctx: C) -> FlowControl<C, T> {
        let hooks = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (index, hook) in hooks.into_iter().enumerate() {
            let outcome = catch_panic(async move { hook(ctx).await }).await;
            let classified = match outcome {
                Ok(Ok(FlowControl::Continue(next))) => {
                    ctx = next;
                    continue;
                }
                Ok(Ok(FlowControl::Stop(result))) => {
                    tracing::debug!(flow = self.name, hook = index, "flow stopped by hook");
                    return FlowControl::Stop(result);
                }
                Ok(Err(err)) => classify_handler_error(err),
                Err(panic) => classify_panic(&panic),
            };
            metrics::inc_errors(classified.local.kind);
            self.logger.error(format_args!(
                "{} hook #{index} failed: {}",
                self.name, classified.local
            ));
            return FlowControl::Stop(Err(classified.local));
        }
        FlowControl::Continue(ctx)
    }
}

impl<C, T> fmt::Debug for Flow<C, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks = self.hooks.read().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("hooks", &hooks)
            .finish_non_exhaustive()
    }
}

/// Context of the pre-connect pipeline.
#[derive(Clone, Debug)]
pub struct ConnectContext {
    /// Connection being established.
    pub connection_id: ConnectionId,
}

/// Context of the pre-call-api pipeline.
#[derive(Clone, Debug)]
pub struct CallApiContext {
    /// Sequence number allocated to the call.
    pub sn: u32,
    /// API being called.
    pub api_name: String,
    /// Request body; hooks may replace it.
    pub body: Body,
    /// Effective timeout of the call.
    pub timeout: Option<Duration>,
}

/// Context of the post-call-api-return pipeline.
#[derive(Clone, Debug)]
pub struct CallApiReturnContext {
    /// Sequence number of the completed call.
    pub sn: u32,
    /// API that was called.
    pub api_name: String,
    /// Request body as sent.
    pub body: Body,
    /// Result about to be returned to the caller; hooks may replace it.
    pub result: OpResult<Body>,
}

/// Context of the pre-send-msg pipeline.
#[derive(Clone, Debug)]
pub struct SendMsgContext {
    /// Message name.
    pub msg_name: String,
    /// Message body; hooks may replace it.
    pub body: Body,
}

/// Context of the pre-send-data pipeline.
#[derive(Clone, Debug)]
pub struct SendDataContext {
    /// Encoded payload about to reach the transport.
    pub payload: Payload,
    /// Sequence number of the request being sent, if any.
    pub sn: Option<u32>,
}

/// Context of the post-received-data pipeline.
#[derive(Clone, Debug)]
pub struct ReceivedDataContext {
    /// Decoded inbound envelope; stopping drops it.
    pub envelope: Envelope,
}

/// Context of the post-disconnect pipeline.
#[derive(Clone, Debug)]
pub struct DisconnectContext {
    /// Close reason, if one was given.
    pub reason: Option<String>,
    /// `true` when the application called `close`.
    pub manual: bool,
}

/// Every pipeline consulted by a connection. All start empty.
pub struct ConnectionFlows {
    /// Runs before a connection is declared connected.
    pub pre_connect: Flow<ConnectContext, ()>,
    /// Runs before a request is sent; may answer it locally.
    pub pre_call_api: Flow<CallApiContext, Body>,
    /// Runs on every call result before it reaches the caller.
    pub post_call_api_return: Flow<CallApiReturnContext, Body>,
    /// Runs before a message is encoded.
    pub pre_send_msg: Flow<SendMsgContext, ()>,
    /// Runs on every encoded payload before it reaches the transport.
    pub pre_send_data: Flow<SendDataContext, ()>,
    /// Runs on every decoded inbound envelope.
    pub post_received_data: Flow<ReceivedDataContext, ()>,
    /// Runs once the connection has closed.
    pub post_disconnect: Flow<DisconnectContext, ()>,
}

impl ConnectionFlows {
    /// Create empty pipelines reporting hook failures to `logger`.
    #[must_use]
    pub fn new(logger: &Arc<dyn Logger>) -> Self {
        Self {
            pre_connect: Flow::new("preConnect", Arc::clone(logger)),
            pre_call_api: Flow::new("preCallApi", Arc::clone(logger)),
            post_call_api_return: Flow::new("postCallApiReturn", Arc::clone(logger)),
            pre_send_msg: Flow::new("preSendMsg", Arc::clone(logger)),
            pre_send_data: Flow::new("preSendData", Arc::clone(logger)),
            post_received_data: Flow::new("postReceivedData", Arc::clone(logger)),
            post_disconnect: Flow::new("postDisconnect", Arc::clone(logger)),
        }
    }
}

impl fmt::Debug for ConnectionFlows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFlows")
            .field("pre_connect", &self.pre_connect)
            .field("pre_call_api", &self.pre_call_api)
            .field("post_call_api_return", &self.post_call_api_return)
            .field("pre_send_msg", &self.pre_send_msg)
            .field("pre_send_data", &self.pre_send_data)
            .field("post_received_data", &self.post_received_data)
            .field("post_disconnect", &self.post_disconnect)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        error::{ErrorKind, TsrpcError},
        logging::NoopLogger,
    };

    type Trace = Arc<Mutex<Vec<&'static str>>>;

    #[fixture]
    fn flow() -> Flow<SendMsgContext, ()> { Flow::new("preSendMsg", Arc::new(NoopLogger)) }

    fn ctx() -> SendMsgContext {
        SendMsgContext {
            msg_name: "Chat".into(),
            body: Body::empty(),
        }
    }

    fn tracing_hook(flow: &Flow<SendMsgContext, ()>, trace: &Trace, label: &'static str) {
        let trace = Arc::clone(trace);
        flow.push_fn(move |ctx: SendMsgContext| {
            trace.lock().expect("trace lock").push(label);
            async move { Ok(FlowControl::Continue(ctx)) }
        });
    }

    #[rstest]
    #[tokio::test]
    async fn empty_flow_continues_with_context(flow: Flow<SendMsgContext, ()>) {
        assert!(matches!(flow.exec(ctx()).await, FlowControl::Continue(c) if c.msg_name == "Chat"));
    }

    #[rstest]
    #[tokio::test]
    async fn hooks_run_in_registration_order_and_see_mutations(flow: Flow<SendMsgContext, ()>) {
        let trace = Trace::default();
        tracing_hook(&flow, &trace, "first");
        flow.push_fn(|mut ctx: SendMsgContext| async move {
            ctx.body = Body::from(serde_json::json!("rewritten"));
            Ok(FlowControl::Continue(ctx))
        });
        tracing_hook(&flow, &trace, "third");

        let FlowControl::Continue(out) = flow.exec(ctx()).await else {
            panic!("flow should continue");
        };
        assert_eq!(out.body, Body::from(serde_json::json!("rewritten")));
        assert_eq!(*trace.lock().expect("trace lock"), ["first", "third"]);
    }

    #[rstest]
    #[tokio::test]
    async fn stop_skips_later_hooks(flow: Flow<SendMsgContext, ()>) {
        let trace = Trace::default();
        tracing_hook(&flow, &trace, "first");
        flow.push_fn(|_ctx: SendMsgContext| async move {
            Ok(FlowControl::Stop(Err(TsrpcError::api("blocked"))))
        });
        tracing_hook(&flow, &trace, "never");

        let FlowControl::Stop(Err(err)) = flow.exec(ctx()).await else {
            panic!("flow should stop with an error");
        };
        assert_eq!(err, TsrpcError::api("blocked"));
        assert_eq!(*trace.lock().expect("trace lock"), ["first"]);
    }

    #[rstest]
    #[case::error(false)]
    #[case::panic(true)]
    #[tokio::test]
    async fn failing_hooks_stop_with_internal_error(
        flow: Flow<SendMsgContext, ()>,
        #[case] panics: bool,
    ) {
        flow.push_fn(move |_ctx: SendMsgContext| async move {
            assert!(!panics, "hook exploded");
            Err(HandlerError::internal("hook failed"))
        });
        let FlowControl::Stop(Err(err)) = flow.exec(ctx()).await else {
            panic!("flow should stop with an error");
        };
        assert_eq!(err.kind, ErrorKind::InternalError);
    }

    #[rstest]
    fn removed_hooks_no_longer_run(flow: Flow<SendMsgContext, ()>) {
        let hook = flow.push_fn(|ctx: SendMsgContext| async move { Ok(FlowControl::Continue(ctx)) });
        assert_eq!(flow.len(), 1);
        assert!(flow.remove(&hook));
        assert!(!flow.remove(&hook));
        assert!(flow.is_empty());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn hook_failures_are_logged_at_error_level() {
        let flow: Flow<SendMsgContext, ()> =
            Flow::new("preSendMsg", Arc::new(crate::logging::TracingLogger));
        flow.push_fn(|_ctx: SendMsgContext| async move {
            Err(HandlerError::internal("quota store offline"))
        });
        let _ = flow.exec(ctx()).await;
        assert!(logs_contain("preSendMsg hook #0 failed"));
        assert!(logs_contain("quota store offline"));
    }
}
