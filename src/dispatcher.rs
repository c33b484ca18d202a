//! Fan-out of inbound one-way messages.
//!
//! [`MsgDispatcher`] keeps an ordered list of handlers per message name.
//! Dispatch spawns one task per handler and returns immediately; a handler
//! that fails or panics is logged and affects neither its siblings nor the
//! reported count.

use std::{fmt, future::Future, sync::Arc};

use dashmap::DashMap;
use futures::{FutureExt, future::BoxFuture};
use tokio::runtime::Handle;

use crate::{
    classify::{HandlerError, classify_handler_error, classify_panic},
    envelope::Body,
    logging::Logger,
    metrics,
    panic::catch_panic,
};

/// Message delivered to handlers.
#[derive(Clone, Debug, PartialEq)]
pub struct MsgEvent {
    /// Name the message was sent under.
    pub msg_name: String,
    /// Message body.
    pub body: Body,
}

/// Registered message handler. Identity is the `Arc` allocation.
pub type MsgHandler =
    Arc<dyn Fn(MsgEvent) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Wrap an async closure as a [`MsgHandler`].
///
/// # Examples
///
/// ```
/// use tsrpc::dispatcher::{MsgEvent, msg_handler};
///
/// let handler = msg_handler(|event: MsgEvent| async move {
///     println!("{} received", event.msg_name);
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn msg_handler<F, Fut>(f: F) -> MsgHandler
where
    F: Fn(MsgEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |event| f(event).boxed())
}

/// Per-connection registry of message handlers.
pub struct MsgDispatcher {
    handlers: DashMap<String, Vec<MsgHandler>>,
    logger: Arc<dyn Logger>,
}

impl MsgDispatcher {
    /// Create an empty registry reporting handler failures to `logger`.
    #[must_use]
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            handlers: DashMap::new(),
            logger,
        }
    }

    /// Register `handler` for `msg_name`.
    ///
    /// Returns `false` if this exact handler is already registered for the
    /// name, in which case nothing changes.
    pub fn add_handler(&self, msg_name: &str, handler: MsgHandler) -> bool {
        let mut entry = self.handlers.entry(msg_name.to_owned()).or_default();
        if entry.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        entry.push(handler);
        true
    }

    /// Remove `handler` from `msg_name`, or every handler of the name when
    /// `handler` is `None`. Returns how many registrations were removed.
    pub fn remove_handler(&self, msg_name: &str, handler: Option<&MsgHandler>) -> usize {
        let Some(target) = handler else {
            return self
                .handlers
                .remove(msg_name)
                .map_or(0, |(_, removed)| removed.len());
        };

        let Some(mut entry) = self.handlers.get_mut(msg_name) else {
            return 0;
        };
        let before = entry.len();
        entry.retain(|h| !Arc::ptr_eq(h, target));
        let removed = before - entry.len();
        let now_empty = entry.is_empty();
        drop(entry);
        if now_empty {
            self.handlers.remove_if(msg_name, |_, list| list.is_empty());
        }
        removed
    }

    /// Number of handlers registered for `msg_name`.
    #[must_use]
    pub fn handler_count(&self, msg_name: &str) -> usize {
        self.handlers.get(msg_name).map_or(0, |list| list.len())
    }

    /// Invoke every handler of `msg_name` concurrently without awaiting them.
    ///
    /// Returns the number of handlers invoked. Outside a Tokio runtime
    /// nothing can be spawned and `0` is returned.
    pub fn dispatch(&self, msg_name: &str, body: Body) -> usize {
        let snapshot = match self.handlers.get(msg_name) {
            Some(list) => list.clone(),
            None => return 0,
        };
        let Ok(runtime) = Handle::try_current() else {
            self.logger.error(format_args!(
                "cannot dispatch {msg_name}: no async runtime available"
            ));
            return 0;
        };

        let count = snapshot.len();
        for handler in snapshot {
            let event = MsgEvent {
                msg_name: msg_name.to_owned(),
                body: body.clone(),
            };
            let logger = Arc::clone(&self.logger);
            runtime.spawn(async move {
                let name = event.msg_name.clone();
                let classified = match catch_panic(async move { handler(event).await }).await {
                    Ok(Ok(())) => return,
                    Ok(Err(err)) => classify_handler_error(err),
                    Err(panic) => classify_panic(&panic),
                };
                metrics::inc_errors(classified.local.kind);
                logger.error(format_args!(
                    "handler for message {name} failed: {}",
                    classified.local
                ));
            });
        }
        metrics::inc_messages_dispatched(count);
        tracing::debug!(msg_name, handlers = count, "message dispatched");
        count
    }
}

impl fmt::Debug for MsgDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MsgDispatcher")
            .field("names", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fmt,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    use rstest::{fixture, rstest};
    use tokio::sync::mpsc;

    use super::*;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Logger for Recorder {
        fn error(&self, args: fmt::Arguments<'_>) {
            self.0.lock().expect("recorder lock").push(args.to_string());
        }
    }

    #[fixture]
    fn recorder() -> Arc<Recorder> { Arc::new(Recorder::default()) }

    fn counting(hits: &Arc<AtomicUsize>) -> MsgHandler {
        let hits = Arc::clone(hits);
        msg_handler(move |_event| {
            hits.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
    }

    #[rstest]
    #[tokio::test]
    async fn duplicate_registration_is_a_no_op(recorder: Arc<Recorder>) {
        let dispatcher = MsgDispatcher::new(recorder);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = msg_handler(move |event: MsgEvent| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event.msg_name);
                Ok(())
            }
        });

        assert!(dispatcher.add_handler("Chat", Arc::clone(&handler)));
        assert!(!dispatcher.add_handler("Chat", handler));
        assert_eq!(dispatcher.handler_count("Chat"), 1);
        assert_eq!(dispatcher.dispatch("Chat", Body::empty()), 1);
        assert_eq!(rx.recv().await.as_deref(), Some("Chat"));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[rstest]
    #[tokio::test]
    async fn failing_handler_does_not_affect_siblings(recorder: Arc<Recorder>) {
        let dispatcher = MsgDispatcher::new(Arc::clone(&recorder) as Arc<dyn Logger>);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let done_tx = Mutex::new(Some(done_tx));

        dispatcher.add_handler(
            "Chat",
            msg_handler(|_event| async { Err(HandlerError::internal("A exploded")) }),
        );
        dispatcher.add_handler(
            "Chat",
            msg_handler(move |event: MsgEvent| {
                let tx = done_tx.lock().expect("sender lock").take();
                async move {
                    if let Some(tx) = tx {
                        let _ = tx.send(event.body);
                    }
                    Ok(())
                }
            }),
        );

        let body = Body::from(serde_json::json!({ "text": "hi" }));
        assert_eq!(dispatcher.dispatch("Chat", body.clone()), 2);
        assert_eq!(done_rx.await.expect("B completes"), body);

        for _ in 0..10 {
            if !recorder.0.lock().expect("recorder lock").is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let logged = recorder.0.lock().expect("recorder lock").clone();
        assert_eq!(logged.len(), 1);
        assert!(logged[0].contains("A exploded"));
    }

    #[rstest]
    #[tokio::test]
    async fn panicking_handler_is_contained(recorder: Arc<Recorder>) {
        let dispatcher = MsgDispatcher::new(Arc::clone(&recorder) as Arc<dyn Logger>);
        let hits = Arc::new(AtomicUsize::new(0));
        dispatcher.add_handler(
            "Chat",
            msg_handler(|event: MsgEvent| async move {
                if event.msg_name == "Chat" {
                    panic!("handler panicked");
                }
                Ok(())
            }),
        );
        dispatcher.add_handler("Chat", counting(&hits));

        assert_eq!(dispatcher.dispatch("Chat", Body::empty()), 2);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(recorder.0.lock().expect("recorder lock")[0].contains("handler panicked"));
    }

    #[rstest]
    #[tokio::test]
    async fn removing_without_handler_clears_the_name(recorder: Arc<Recorder>) {
        let dispatcher = MsgDispatcher::new(recorder);
        let hits = Arc::new(AtomicUsize::new(0));
        dispatcher.add_handler("Chat", counting(&hits));
        dispatcher.add_handler("Chat", counting(&hits));

        assert_eq!(dispatcher.remove_handler("Chat", None), 2);
        assert_eq!(dispatcher.dispatch("Chat", Body::empty()), 0);
    }

    #[rstest]
    fn removing_one_handler_keeps_the_rest(recorder: Arc<Recorder>) {
        let dispatcher = MsgDispatcher::new(recorder);
        let hits = Arc::new(AtomicUsize::new(0));
        let first = counting(&hits);
        dispatcher.add_handler("Chat", Arc::clone(&first));
        dispatcher.add_handler("Chat", counting(&hits));

        assert_eq!(dispatcher.remove_handler("Chat", Some(&first)), 1);
        assert_eq!(dispatcher.remove_handler("Chat", Some(&first)), 0);
        assert_eq!(dispatcher.handler_count("Chat"), 1);
    }

    #[rstest]
    fn dispatch_outside_a_runtime_invokes_nothing(recorder: Arc<Recorder>) {
        let dispatcher = MsgDispatcher::new(Arc::clone(&recorder) as Arc<dyn Logger>);
        let hits = Arc::new(AtomicUsize::new(0));
        dispatcher.add_handler("Chat", counting(&hits));
        assert_eq!(dispatcher.dispatch("Chat", Body::empty()), 0);
        assert_eq!(recorder.0.lock().expect("recorder lock").len(), 1);
    }
}
