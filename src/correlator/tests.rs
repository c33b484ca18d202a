//! Unit tests for the request correlator.

use std::sync::atomic::Ordering;

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::error::ErrorKind;

#[fixture]
fn correlator() -> RequestCorrelator { RequestCorrelator::new() }

#[rstest]
#[tokio::test]
async fn identical_api_names_get_distinct_sns(correlator: RequestCorrelator) {
    let (first, _a) = correlator.register("Echo", None);
    let (second, _b) = correlator.register("Echo", None);
    assert_eq!(first, 1);
    assert_ne!(first, second);
    assert_eq!(correlator.pending_count(), 2);
}

#[rstest]
#[tokio::test]
async fn resolve_fulfils_once(correlator: RequestCorrelator) {
    let (sn, call) = correlator.register("Echo", None);
    assert!(correlator.resolve(sn, Ok(Body::from(json!({ "v": 1 })))));
    assert!(!correlator.resolve(sn, Ok(Body::empty())));
    assert_eq!(call.await, Ok(Body::from(json!({ "v": 1 }))));
    assert!(!correlator.is_pending(sn));
}

#[rstest]
#[tokio::test]
async fn unknown_sn_is_ignored(correlator: RequestCorrelator) {
    assert!(!correlator.resolve(77, Ok(Body::empty())));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn timeout_resolves_and_releases_sn(correlator: RequestCorrelator) {
    let started = tokio::time::Instant::now();
    let (sn, call) = correlator.register("Echo", Some(Duration::from_millis(100)));

    let err = call.await.expect_err("silent peer must time out");
    assert_eq!(err.kind, ErrorKind::TimeoutError);
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(!correlator.is_pending(sn));
    assert!(!correlator.resolve(sn, Ok(Body::empty())));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn response_beats_timer(correlator: RequestCorrelator) {
    let (sn, call) = correlator.register("Echo", Some(Duration::from_millis(100)));
    assert!(correlator.resolve(sn, Ok(Body::empty())));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(call.await, Ok(Body::empty()));
}

#[rstest]
#[tokio::test]
async fn close_sweeps_everything_once(correlator: RequestCorrelator) {
    let calls: Vec<_> = (0..3).map(|_| correlator.register("Echo", None)).collect();
    assert_eq!(
        calls.iter().map(|(sn, _)| *sn).collect::<Vec<_>>(),
        [1, 2, 3]
    );

    assert_eq!(correlator.close_all(Some("bye")), 3);
    assert_eq!(correlator.close_all(None), 0);
    for (sn, call) in calls {
        let err = call.await.expect_err("closed");
        assert_eq!(err.kind, ErrorKind::ConnectionClosed);
        assert_eq!(err.info, Some(json!({ "reason": "bye" })));
        assert!(!correlator.resolve(sn, Ok(Body::empty())));
    }
}

#[rstest]
#[tokio::test]
async fn registration_after_close_fails_immediately(correlator: RequestCorrelator) {
    correlator.close_all(None);
    let (_, call) = correlator.register("Echo", Some(Duration::from_secs(5)));
    assert_eq!(
        call.await.map_err(|e| e.kind),
        Err(ErrorKind::ConnectionClosed)
    );
    assert_eq!(correlator.pending_count(), 0);
}

#[rstest]
#[tokio::test]
async fn cancel_resolves_with_cancelled(correlator: RequestCorrelator) {
    let (sn, call) = correlator.register("Echo", None);
    assert!(correlator.cancel(sn));
    assert!(!correlator.resolve(sn, Ok(Body::empty())));
    assert_eq!(call.await.map_err(|e| e.kind), Err(ErrorKind::Cancelled));
}

#[rstest]
#[tokio::test]
async fn dropping_the_call_releases_its_sn(correlator: RequestCorrelator) {
    let (sn, call) = correlator.register("Echo", Some(Duration::from_secs(5)));
    drop(call);
    assert!(!correlator.is_pending(sn));
}

#[rstest]
#[tokio::test]
async fn counter_wraps_past_zero_and_skips_pending(correlator: RequestCorrelator) {
    let (one, _held) = correlator.register("Echo", None);
    assert_eq!(one, 1);

    correlator.inner.next_sn.store(u32::MAX - 1, Ordering::Relaxed);
    let (max, _a) = correlator.register("Echo", None);
    let (wrapped, _b) = correlator.register("Echo", None);
    assert_eq!(max, u32::MAX);
    assert_eq!(wrapped, 2, "0 is never issued and 1 is still pending");
}
