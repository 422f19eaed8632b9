//! Retry Tests
//!
//! Transport failures are retried for reads and retry-safe writes only.
//! Timeouts apply per attempt; a total timeout bounds all attempts.

use std::time::{Duration, Instant};

use crate::common::*;

// ============================================================================
// Dropped connections
// ============================================================================

#[tokio::test]
async fn read_retries_once_after_dropped_connection() {
    let mock = MockCluster::start(2).await.unwrap();
    let client = connect(&mock).await;
    let k = key("retry", 1);
    client.put(&k, &bins! { "a" => 1 }).await.unwrap();

    let node = master(&mock, &k);
    node.drop_next_requests(1);
    let before = node.requests();

    let rec = client.get(&k).await.unwrap();
    assert_eq!(rec.bin("a"), Some(&Value::Int(1)));
    assert_eq!(node.requests(), before + 2);
}

#[tokio::test]
async fn read_fails_when_retries_are_exhausted() {
    let mock = MockCluster::start(1).await.unwrap();
    let client = connect(&mock).await;
    let k = key("retry", 2);

    mock.node(0).drop_next_requests(5);
    let before = mock.node(0).requests();
    let err = client.get(&k).await.unwrap_err();
    assert!(matches!(err, Error::Connection { .. }), "{:?}", err);
    // one try plus the default single retry
    assert_eq!(mock.node(0).requests(), before + 2);
}

#[tokio::test]
async fn write_not_retry_safe_fails_on_first_transport_error() {
    let mock = MockCluster::start(2).await.unwrap();
    let client = connect(&mock).await;
    let k = key("retry", 3);

    let node = master(&mock, &k);
    node.drop_next_requests(1);
    let before = node.requests();
    let err = client.put(&k, &bins! { "a" => 1 }).await.unwrap_err();
    assert!(matches!(err, Error::Connection { .. }), "{:?}", err);
    assert!(err.is_retryable());
    assert_eq!(node.requests(), before + 1);

    // the dropped write never reached the store
    let err = client.get(&k).await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::RecordNotFound);

    client.put(&k, &bins! { "a" => 1 }).await.unwrap();
    assert_eq!(client.get(&k).await.unwrap().generation(), 1);
}

#[tokio::test]
async fn retry_safe_write_is_retried() {
    let mock = MockCluster::start(2).await.unwrap();
    let base = connect(&mock).await;
    let mut policies = base.policies().clone();
    policies.write.retry_safe = true;
    let client = base.with_policies(policies);
    let k = key("retry", 4);

    master(&mock, &k).drop_next_requests(1);
    client.put(&k, &bins! { "a" => 7 }).await.unwrap();
    assert_eq!(client.get(&k).await.unwrap().bin("a"), Some(&Value::Int(7)));
}

#[tokio::test]
async fn server_errors_are_not_retried() {
    let mock = MockCluster::start(1).await.unwrap();
    let client = connect(&mock).await;
    let before = mock.node(0).requests();
    let err = client.get(&key("retry", 5)).await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::RecordNotFound);
    assert_eq!(mock.node(0).requests(), before + 1);
}

// ============================================================================
// Timeouts
// ============================================================================

#[tokio::test]
async fn slow_node_times_out_per_attempt() {
    let mock = MockCluster::start(1).await.unwrap();
    let base = connect(&mock).await;
    let k = key("retry", 6);
    base.put(&k, &bins! { "a" => 1 }).await.unwrap();

    let mut policies = base.policies().clone();
    policies.read.base.timeout_ms = 50;
    policies.read.base.max_retries = 0;
    let client = base.with_policies(policies);

    mock.node(0).set_delay(Duration::from_millis(300));
    let err = client.get(&k).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "{:?}", err);
    assert_eq!(err.result_code(), ResultCode::Timeout);

    // the timed-out connection is not reused
    mock.node(0).set_delay(Duration::ZERO);
    assert_eq!(client.get(&k).await.unwrap().bin("a"), Some(&Value::Int(1)));
}

#[tokio::test]
async fn total_timeout_bounds_all_attempts() {
    let mock = MockCluster::start(1).await.unwrap();
    let base = connect(&mock).await;
    let mut policies = base.policies().clone();
    policies.read.base.timeout_ms = 100;
    policies.read.base.max_retries = 10;
    policies.read.base.total_timeout_ms = Some(250);
    let client = base.with_policies(policies);

    mock.node(0).set_delay(Duration::from_millis(500));
    let started = Instant::now();
    let err = client.get(&key("retry", 7)).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "{:?}", err);
    assert!(started.elapsed() < Duration::from_millis(1000));
}
