//! Schema fingerprint exchange.
//!
//! Peers attach a [`ProtoInfo`] to the first request of a connection and the
//! responder answers with its own. Differing `md5` fingerprints mean the two
//! sides were built from different service definitions; that is reported as a
//! warning and never fails a call.

use std::sync::{
    Arc,
    Mutex,
    PoisonError,
    atomic::{AtomicBool, Ordering},
};

use serde::{Deserialize, Serialize};

use crate::{codec::DecodeError, logging::Logger};

/// Reserved out-of-band header carrying a serialised [`ProtoInfo`].
pub const PROTO_INFO_HEADER: &str = "x-tsrpc-proto-info";

/// Protocol version advertised in locally built [`ProtoInfo`] records.
pub const TSRPC_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema fingerprint record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtoInfo {
    /// Modification time of the service definition, unix milliseconds.
    pub last_modified: i64,
    /// Digest of the service definition.
    pub md5: String,
    /// Engine version that produced the record.
    pub tsrpc_version: String,
    /// Optional runtime version of the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_version: Option<String>,
}

impl ProtoInfo {
    /// Build a record for the local service definition.
    #[must_use]
    pub fn new(md5: impl Into<String>, last_modified: i64) -> Self {
        Self {
            last_modified,
            md5: md5.into(),
            tsrpc_version: TSRPC_VERSION.to_owned(),
            node_version: None,
        }
    }

    /// Attach a runtime version string.
    #[must_use]
    pub fn with_node_version(mut self, version: impl Into<String>) -> Self {
        self.node_version = Some(version.into());
        self
    }

    /// Serialise for [`PROTO_INFO_HEADER`].
    #[must_use]
    pub fn to_header_value(&self) -> String {
        // A struct of strings and integers always serialises.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse a [`PROTO_INFO_HEADER`] value.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidField`] for malformed values.
    pub fn from_header_value(value: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(value).map_err(|e| DecodeError::InvalidField {
            field: "protoInfo",
            reason: e.to_string(),
        })
    }
}

/// Detected disagreement between local and remote fingerprints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProtoMismatch {
    /// Local record.
    pub local: ProtoInfo,
    /// Record received from the peer.
    pub remote: ProtoInfo,
}

/// Callback notified when fingerprints disagree.
pub type MismatchHandler = Arc<dyn Fn(&ProtoMismatch) + Send + Sync>;

/// Outcome of comparing a remote record with the local one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Negotiation {
    /// Fingerprints agree.
    Matched,
    /// Fingerprints differ.
    Mismatched(ProtoMismatch),
    /// No local record is configured, nothing to compare.
    Unknown,
}

/// Per-connection negotiation state.
pub struct ProtoNegotiator {
    local: Option<ProtoInfo>,
    sent: AtomicBool,
    remote: Mutex<Option<ProtoInfo>>,
    on_mismatch: Option<MismatchHandler>,
    logger: Arc<dyn Logger>,
}

impl ProtoNegotiator {
    /// Create a negotiator advertising `local`.
    #[must_use]
    pub fn new(
        local: Option<ProtoInfo>,
        on_mismatch: Option<MismatchHandler>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            local,
            sent: AtomicBool::new(false),
            remote: Mutex::new(None),
            on_mismatch,
            logger,
        }
    }

    /// Local record to attach to an outbound request.
    ///
    /// Returns `Some` only for the first request of the connection, or the
    /// first one after a mismatch was observed.
    pub fn outbound_for_request(&self) -> Option<ProtoInfo> {
        let local = self.local.as_ref()?;
        if self.sent.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(local.clone())
        }
    }

    /// Local record to echo on a response.
    ///
    /// A record is returned only when the request carried one; the
    /// request's record is compared against the local one first.
    pub fn reply_for(&self, request_info: Option<&ProtoInfo>) -> Option<ProtoInfo> {
        let remote = request_info?;
        self.observe_remote(remote);
        self.local.clone()
    }

    /// Compare a record received from the peer with the local one.
    pub fn observe_remote(&self, remote: &ProtoInfo) -> Negotiation {
        *self.remote.lock().unwrap_or_else(PoisonError::into_inner) = Some(remote.clone());
        let Some(local) = &self.local else {
            return Negotiation::Unknown;
        };
        if local.md5 == remote.md5 {
            return Negotiation::Matched;
        }

        let mismatch = ProtoMismatch {
            local: local.clone(),
            remote: remote.clone(),
        };
        self.logger.warn(format_args!(
            "service definition mismatch: local md5 {} (modified {}), remote md5 {} (modified {})",
            local.md5, local.last_modified, remote.md5, remote.last_modified
        ));
        // Renegotiate on the next request.
        self.sent.store(false, Ordering::Release);
        if let Some(handler) = &self.on_mismatch {
            handler(&mismatch);
        }
        Negotiation::Mismatched(mismatch)
    }

    /// Most recent record received from the peer.
    #[must_use]
    pub fn remote(&self) -> Option<ProtoInfo> {
        self.remote
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
