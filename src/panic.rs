//! Panic containment for user-supplied handlers and hooks.
//!
//! Message handlers, API handlers and flow hooks are arbitrary application
//! code. A panic inside one of them must not take down the connection's
//! reader task, so every invocation is wrapped with [`catch_panic`] and the
//! payload is rendered with [`format_panic`] for the local log.

use std::{any::Any, fmt, future::Future, panic::AssertUnwindSafe};

use futures::FutureExt;

/// Wrapper that formats a panic payload when logged or displayed.
///
/// ```
/// use tsrpc::panic::format_panic;
/// assert_eq!(format_panic(Box::new("boom")).to_string(), "boom");
/// assert_eq!(
///     format_panic(Box::new(String::from("boom"))).to_string(),
///     "boom"
/// );
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            f.write_str("non-string panic payload")
        }
    }
}

/// Create a [`PanicMessage`] for the given payload.
pub fn format_panic(panic: Box<dyn Any + Send>) -> PanicMessage { PanicMessage(panic) }

/// Drive `future` to completion, converting a panic into an `Err`.
///
/// # Errors
///
/// Returns the formatted panic payload if polling `future` panicked.
pub async fn catch_panic<F>(future: F) -> Result<F::Output, PanicMessage>
where
    F: Future,
{
    AssertUnwindSafe(future).catch_unwind().await.map_err(format_panic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn catch_panic_passes_output_through() {
        assert_eq!(catch_panic(async { 7 }).await.ok(), Some(7));
    }

    #[tokio::test]
    async fn catch_panic_reports_payload() {
        let explode = true;
        let result = catch_panic(async move {
            assert!(!explode, "handler exploded");
            1
        })
        .await;
        let message = result.expect_err("panic must be caught");
        assert_eq!(message.to_string(), "handler exploded");
    }

    #[test]
    fn opaque_payload_is_described() {
        assert_eq!(
            format_panic(Box::new(5_u32)).to_string(),
            "non-string panic payload"
        );
    }
}
