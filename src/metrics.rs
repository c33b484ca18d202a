//! Metric helpers for `tsrpc`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! every helper compiles to a no-op.

use crate::error::{ErrorKind, OpResult};

/// Name of the counter tracking completed API calls, labelled by `result`.
pub const CALLS_TOTAL: &str = "tsrpc_calls_total";
/// Name of the counter tracking envelopes, labelled by `direction`.
pub const ENVELOPES_TOTAL: &str = "tsrpc_envelopes_total";
/// Name of the counter tracking failures, labelled by `kind`.
pub const ERRORS_TOTAL: &str = "tsrpc_errors_total";
/// Name of the counter tracking message handler invocations.
pub const MESSAGES_DISPATCHED: &str = "tsrpc_messages_dispatched_total";
/// Name of the gauge tracking outstanding requests.
pub const PENDING_REQUESTS: &str = "tsrpc_pending_requests";

/// Direction of envelope processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Envelopes received from the peer.
    Inbound,
    /// Envelopes sent to the peer.
    Outbound,
}

impl Direction {
    /// Label value for this direction.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// Record an envelope crossing the transport boundary.
pub fn inc_envelopes(direction: Direction) {
    #[cfg(feature = "metrics")]
    metrics::counter!(ENVELOPES_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record the outcome of an API call.
pub fn record_call<T>(result: &OpResult<T>) {
    #[cfg(feature = "metrics")]
    {
        let label = match result {
            Ok(_) => "ok",
            Err(err) => err.kind.as_str(),
        };
        metrics::counter!(CALLS_TOTAL, "result" => label).increment(1);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = result;
}

/// Record a failure of the given kind.
pub fn inc_errors(kind: ErrorKind) {
    #[cfg(feature = "metrics")]
    metrics::counter!(ERRORS_TOTAL, "kind" => kind.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// Record `count` message handler invocations.
pub fn inc_messages_dispatched(count: usize) {
    #[cfg(feature = "metrics")]
    metrics::counter!(MESSAGES_DISPATCHED).increment(u64::try_from(count).unwrap_or(u64::MAX));
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

/// Record a newly registered pending request.
pub fn inc_pending() {
    #[cfg(feature = "metrics")]
    metrics::gauge!(PENDING_REQUESTS).increment(1.0);
}

/// Record a pending request leaving the table.
pub fn dec_pending() {
    #[cfg(feature = "metrics")]
    metrics::gauge!(PENDING_REQUESTS).decrement(1.0);
}
