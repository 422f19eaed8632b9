//! Workflow Scenarios
//!
//! Multi-step flows through the public API: record lifecycle, collection
//! operations, UDFs, secondary-index queries and background jobs.

use std::collections::BTreeSet;

use futures::{StreamExt, TryStreamExt};

use aerie::operations::maps::{self, MapPolicy, MapReturnType};
use aerie::operations::{self, lists};
use aerie::{Filter, JobStatus, Query, Scan, StreamState};
use aerie_testing::ECHO_MODULE;

use crate::common::*;

// ============================================================================
// Records
// ============================================================================

#[tokio::test]
async fn record_lifecycle() {
    let mock = MockCluster::start(3).await.unwrap();
    let client = connect(&mock).await;
    let k = key("life", 1);

    client.put(&k, &bins! { "a" => 1, "b" => "x" }).await.unwrap();
    let rec = client.get(&k).await.unwrap();
    assert_eq!(rec.generation(), 1);
    assert_eq!(rec.bin("b"), Some(&Value::from("x")));

    client.incr(&k, &bins! { "a" => 5 }).await.unwrap();
    let rec = client.get(&k).await.unwrap();
    assert_eq!(rec.bin("a"), Some(&Value::Int(6)));
    assert_eq!(rec.generation(), 2);

    // unchanged record reads back identically
    let again = client.get(&k).await.unwrap();
    assert_eq!(again.bins, rec.bins);
    assert_eq!(again.generation(), rec.generation());

    assert!(client.remove(&k).await.unwrap());
    assert!(!client.exists(&k).await.unwrap());
    assert!(!client.remove(&k).await.unwrap());
}

#[tokio::test]
async fn collection_operations() {
    let mock = MockCluster::start(2).await.unwrap();
    let client = connect(&mock).await;
    let k = key("cdt", 1);
    let p = MapPolicy::default();

    client
        .operate(
            &k,
            &[
                lists::append_items("l", vec![Value::Int(3), Value::Int(1), Value::Int(2)]),
                maps::put("m", "x", 10, p),
            ],
        )
        .await
        .unwrap();
    client
        .operate(&k, &[maps::increment("m", "x", 5, p)])
        .await
        .unwrap();

    let rec = client
        .operate(
            &k,
            &[
                lists::size("l"),
                maps::get_by_key("m", "x", MapReturnType::Value),
                operations::put("done", 1),
            ],
        )
        .await
        .unwrap();
    assert_eq!(rec.bin("l"), Some(&Value::Int(3)));
    assert_eq!(rec.bin("m"), Some(&Value::Int(15)));

    let rec = client.get(&k).await.unwrap();
    assert_eq!(rec.bin("done"), Some(&Value::Int(1)));
    assert_eq!(rec.generation(), 3);
}

#[tokio::test]
async fn empty_operate_is_a_parameter_error() {
    let mock = MockCluster::start(1).await.unwrap();
    let client = connect(&mock).await;
    let err = client.operate(&key("cdt", 2), &[]).await.unwrap_err();
    assert!(matches!(err, Error::Parameter { .. }), "{:?}", err);
    assert_eq!(mock.requests(), 0);
}

// ============================================================================
// UDF
// ============================================================================

#[tokio::test]
async fn udf_reads_and_writes_the_record() {
    let mock = MockCluster::start(2).await.unwrap();
    let client = connect(&mock).await;
    let k = key("udf", 1);
    client.put(&k, &bins! { "name" => "ada" }).await.unwrap();

    let v = client
        .apply(&k, ECHO_MODULE, "get_bin", &[Value::from("name")])
        .await
        .unwrap();
    assert_eq!(v, Value::from("ada"));

    client
        .execute(&k, ECHO_MODULE, "put_bin", &[Value::from("score"), Value::Int(42)])
        .await
        .unwrap();
    assert_eq!(client.get(&k).await.unwrap().bin("score"), Some(&Value::Int(42)));

    let err = client
        .apply(&k, ECHO_MODULE, "fail", &[Value::from("bad input")])
        .await
        .unwrap_err();
    assert_eq!(err.result_code(), ResultCode::Udf);
    assert!(err.to_string().contains("bad input"));
}

// ============================================================================
// Queries and jobs
// ============================================================================

#[tokio::test]
async fn integer_index_range_query() {
    let mock = MockCluster::start(3).await.unwrap();
    let client = connect(&mock).await;
    client
        .create_integer_index("test", Some("people"), "age", "people_age")
        .await
        .unwrap()
        .wait_until_done(POLL)
        .await
        .unwrap();

    for (i, age) in [17, 18, 25, 30, 31].iter().enumerate() {
        client
            .put(&key("people", i as i64), &bins! { "age" => *age })
            .await
            .unwrap();
    }

    let query = Query::new("test", Some("people"), Filter::range("age", 18, 30));
    let ages: BTreeSet<i64> = client
        .query(&query)
        .unwrap()
        .map_ok(|r| r.bin("age").and_then(Value::as_int).unwrap())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(ages, BTreeSet::from([18, 25, 30]));

    client.index_remove("test", "people_age").await.unwrap();
    let mut stream = client.query(&query).unwrap();
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.result_code(), ResultCode::IndexNotFound);
    assert!(stream.next().await.is_none());
    assert_eq!(stream.state(), StreamState::Failed);
}

#[tokio::test]
async fn background_query_updates_matching_records() {
    let mock = MockCluster::start(2).await.unwrap();
    let client = connect(&mock).await;
    client
        .create_integer_index("test", Some("bg"), "n", "bg_n")
        .await
        .unwrap()
        .wait_until_done(POLL)
        .await
        .unwrap();
    for i in 0..10 {
        client.put(&key("bg", i), &bins! { "n" => i }).await.unwrap();
    }

    let job = client
        .query_background(
            &Query::new("test", Some("bg"), Filter::range("n", 5, 9)),
            ECHO_MODULE,
            "put_bin",
            &[Value::from("hit"), Value::Int(1)],
        )
        .await
        .unwrap();
    let info = job.wait_until_done(POLL).await.unwrap();
    assert_eq!(info.status, JobStatus::Completed);

    for i in 0..10 {
        let rec = client.get(&key("bg", i)).await.unwrap();
        let expected = if i >= 5 { Some(&Value::Int(1)) } else { None };
        assert_eq!(rec.bin("hit"), expected, "record {}", i);
    }
}

#[tokio::test]
async fn aborted_scan_ends_cleanly() {
    let mock = MockCluster::start(2).await.unwrap();
    let base = connect(&mock).await;
    for i in 0..50 {
        base.put(&key("abort", i), &bins! { "i" => i }).await.unwrap();
    }
    let mut policies = base.policies().clone();
    policies.scan.record_queue_size = 1;
    let client = base.with_policies(policies);

    let mut stream = client.scan(&Scan::new("test", Some("abort"))).unwrap();
    assert!(stream.next().await.unwrap().is_ok());
    stream.abort();
    assert!(stream.next().await.is_none());
    assert_eq!(stream.state(), StreamState::Aborted);

    // the cluster keeps serving after the abandoned streams
    assert_eq!(client.get(&key("abort", 3)).await.unwrap().bin("i"), Some(&Value::Int(3)));
}
