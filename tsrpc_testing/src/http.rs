//! Request-style transport answering from a test-supplied script.

use std::sync::Mutex;

use async_trait::async_trait;
use tsrpc::{
    Envelope,
    EnvelopeCodec,
    JsonCodec,
    OpResult,
    Payload,
    transport::{RequestOptions, RequestTransport, TransportReply},
};

/// One exchange observed by a [`ScriptedHttpTransport`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Encoded envelope sent by the connection.
    pub payload: Payload,
    /// Options the connection attached.
    pub options: RequestOptions,
}

impl RecordedRequest {
    /// Decode the payload with [`JsonCodec`].
    ///
    /// # Panics
    ///
    /// Panics if the payload is not a valid envelope.
    #[must_use]
    pub fn envelope(&self) -> Envelope { JsonCodec.decode(&self.payload).expect("decode request") }

    /// Header value by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.options
            .headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

type Script = Box<dyn Fn(&RecordedRequest) -> OpResult<TransportReply> + Send + Sync>;

/// [`RequestTransport`] whose replies come from a closure.
pub struct ScriptedHttpTransport {
    script: Script,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedHttpTransport {
    /// Answer every exchange with `script`.
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&RecordedRequest) -> OpResult<TransportReply> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Exchanges seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl RequestTransport for ScriptedHttpTransport {
    async fn send(&self, payload: Payload, options: RequestOptions) -> OpResult<TransportReply> {
        let request = RecordedRequest { payload, options };
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        (self.script)(&request)
    }
}

/// A `200` reply carrying `envelope` encoded with [`JsonCodec`].
///
/// # Panics
///
/// Panics if `envelope` cannot be encoded.
#[must_use]
pub fn response_reply(envelope: &Envelope) -> TransportReply {
    TransportReply::ok(JsonCodec.encode(envelope).expect("encode reply"))
}
