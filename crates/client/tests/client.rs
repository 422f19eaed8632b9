//! Client commands against an in-process mock cluster
//!
//! ```bash
//! cargo test -p aerie-client --test client
//! ```

use std::time::Duration;

use futures::{StreamExt, TryStreamExt};

use aerie_client::{BatchRead, Client, ClientConfig, JobStatus, Query, Scan, StreamState};
use aerie_core::operations::{self, lists};
use aerie_core::{bins, BinSelection, Error, Filter, Key, ResultCode, Value};
use aerie_testing::{MockCluster, ECHO_MODULE};

// ============================================================================
// Helpers
// ============================================================================

async fn connect(mock: &MockCluster) -> Client {
    let mut config = ClientConfig::with_hosts(&mock.seed());
    config.conn_timeout_ms = 500;
    config.tend_interval_ms = 60_000;
    Client::connect(&config).await.unwrap()
}

fn key(set: &str, i: i64) -> Key {
    Key::new("test", set, i).unwrap()
}

// ============================================================================
// Single-record commands
// ============================================================================

#[tokio::test]
async fn test_put_get_and_add_bump_generation() {
    let mock = MockCluster::start(2).await.unwrap();
    let client = connect(&mock).await;
    let k = key("crud", 1);

    client.put(&k, &bins! { "a" => 1, "b" => "x" }).await.unwrap();
    let rec = client.get(&k).await.unwrap();
    assert_eq!(rec.generation(), 1);
    assert_eq!(rec.bin("a"), Some(&Value::Int(1)));
    assert_eq!(rec.bin("b"), Some(&Value::from("x")));

    client.add(&k, &bins! { "a" => 5 }).await.unwrap();
    let rec = client.get(&k).await.unwrap();
    assert_eq!(rec.bin("a"), Some(&Value::Int(6)));
    assert_eq!(rec.generation(), 2);
}

#[tokio::test]
async fn test_get_missing_is_record_not_found() {
    let mock = MockCluster::start(1).await.unwrap();
    let client = connect(&mock).await;
    let err = client.get(&key("crud", 404)).await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::RecordNotFound);
}

#[tokio::test]
async fn test_exists_and_remove() {
    let mock = MockCluster::start(1).await.unwrap();
    let client = connect(&mock).await;
    let k = key("crud", 2);

    assert!(!client.exists(&k).await.unwrap());
    client.put(&k, &bins! { "a" => 1 }).await.unwrap();
    assert!(client.exists(&k).await.unwrap());
    assert!(client.remove(&k).await.unwrap());
    assert!(!client.remove(&k).await.unwrap());
    assert!(!client.exists(&k).await.unwrap());
}

#[tokio::test]
async fn test_select_returns_named_bins_only() {
    let mock = MockCluster::start(1).await.unwrap();
    let client = connect(&mock).await;
    let k = key("crud", 3);
    client.put(&k, &bins! { "a" => 1, "b" => 2, "c" => 3 }).await.unwrap();

    let rec = client.select(&k, &["a", "c"]).await.unwrap();
    assert_eq!(rec.bins.len(), 2);
    assert!(rec.bin("b").is_none());

    let header = client.get_header(&k).await.unwrap();
    assert!(header.bins.is_empty());
    assert_eq!(header.generation(), 1);
}

#[tokio::test]
async fn test_append_prepend_and_touch() {
    let mock = MockCluster::start(1).await.unwrap();
    let client = connect(&mock).await;
    let k = key("crud", 4);
    client.put(&k, &bins! { "s" => "mid" }).await.unwrap();
    client.append(&k, &bins! { "s" => "-end" }).await.unwrap();
    client.prepend(&k, &bins! { "s" => "start-" }).await.unwrap();
    client.touch(&k).await.unwrap();

    let rec = client.get(&k).await.unwrap();
    assert_eq!(rec.bin("s"), Some(&Value::from("start-mid-end")));
    assert_eq!(rec.generation(), 4);

    let err = client.touch(&key("crud", 405)).await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::RecordNotFound);
}

#[tokio::test]
async fn test_operate_runs_ops_in_order() {
    let mock = MockCluster::start(1).await.unwrap();
    let client = connect(&mock).await;
    let k = key("crud", 5);

    let ops = vec![
        operations::put("n", 1),
        lists::append_items("l", vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        lists::get("l", -1),
    ];
    let rec = client.operate(&k, &ops).await.unwrap();
    assert_eq!(rec.bin("l"), Some(&Value::Int(3)));

    let stored = client.get(&k).await.unwrap();
    assert_eq!(stored.bin("n"), Some(&Value::Int(1)));
    assert_eq!(
        stored.bin("l"),
        Some(&Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
    );
    assert!(client.operate(&k, &[]).await.is_err());
}

// ============================================================================
// UDF
// ============================================================================

#[tokio::test]
async fn test_apply_returns_udf_value() {
    let mock = MockCluster::start(1).await.unwrap();
    let client = connect(&mock).await;
    let k = key("udf", 1);

    let v = client
        .apply(&k, ECHO_MODULE, "echo", &[Value::from("hello")])
        .await
        .unwrap();
    assert_eq!(v, Value::from("hello"));

    client
        .execute(&k, ECHO_MODULE, "put_bin", &[Value::from("x"), Value::Int(9)])
        .await
        .unwrap();
    assert_eq!(client.get(&k).await.unwrap().bin("x"), Some(&Value::Int(9)));
}

#[tokio::test]
async fn test_apply_failure_is_udf_error() {
    let mock = MockCluster::start(1).await.unwrap();
    let client = connect(&mock).await;
    let err = client
        .apply(&key("udf", 2), ECHO_MODULE, "fail", &[Value::from("nope")])
        .await
        .unwrap_err();
    assert_eq!(err.result_code(), ResultCode::Udf);
    assert!(err.to_string().contains("nope"));
}

// ============================================================================
// Batch
// ============================================================================

#[tokio::test]
async fn test_batch_get_keeps_input_order_across_nodes() {
    let mock = MockCluster::start(3).await.unwrap();
    let client = connect(&mock).await;
    let keys: Vec<Key> = (0..12).map(|i| key("batch", i)).collect();
    for (i, k) in keys.iter().enumerate() {
        if i % 2 == 0 {
            client.put(k, &bins! { "i" => i as i64 }).await.unwrap();
        }
    }

    let results = client.batch_get(&keys).await.unwrap();
    assert_eq!(results.len(), keys.len());
    for (i, r) in results.iter().enumerate() {
        assert_eq!(r.key, keys[i]);
        assert!(r.is_ok());
        if i % 2 == 0 {
            assert_eq!(r.record.as_ref().unwrap().bin("i"), Some(&Value::Int(i as i64)));
        } else {
            assert!(!r.exists());
            assert_eq!(r.status, ResultCode::RecordNotFound);
        }
    }
}

#[tokio::test]
async fn test_batch_read_per_key_selection() {
    let mock = MockCluster::start(2).await.unwrap();
    let client = connect(&mock).await;
    let (a, b) = (key("batch", 100), key("batch", 101));
    client.put(&a, &bins! { "x" => 1, "y" => 2 }).await.unwrap();
    client.put(&b, &bins! { "x" => 3, "y" => 4 }).await.unwrap();

    let reads = vec![
        BatchRead {
            key: a.clone(),
            bins: BinSelection::named(&["y"]),
        },
        BatchRead::all(b.clone()),
    ];
    let results = client.batch_read(&reads).await.unwrap();
    let first = results[0].record.as_ref().unwrap();
    assert_eq!(first.bins.len(), 1);
    assert_eq!(first.bin("y"), Some(&Value::Int(2)));
    assert_eq!(results[1].record.as_ref().unwrap().bins.len(), 2);

    let exists = client.batch_exists(&[a, key("batch", 999)]).await.unwrap();
    assert!(exists[0].exists());
    assert!(!exists[1].exists());
}

// ============================================================================
// Scan and query
// ============================================================================

#[tokio::test]
async fn test_scan_returns_every_record_of_set() {
    let mock = MockCluster::start(3).await.unwrap();
    let client = connect(&mock).await;
    for i in 0..30 {
        client.put(&key("scan", i), &bins! { "i" => i }).await.unwrap();
    }
    client.put(&key("other", 1), &bins! { "i" => 1 }).await.unwrap();

    let records: Vec<_> = client
        .scan(&Scan::new("test", Some("scan")))
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(records.len(), 30);
    assert!(records.iter().all(|r| r.key.set() == "scan"));

    let headers: Vec<_> = client
        .scan(&Scan::new("test", Some("scan")).no_bins().concurrent(false))
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(headers.len(), 30);
    assert!(headers.iter().all(|r| r.bins.is_empty()));
}

#[tokio::test]
async fn test_scan_abort_ends_cleanly() {
    let mock = MockCluster::start(2).await.unwrap();
    let base = connect(&mock).await;
    let mut policies = base.policies().clone();
    policies.scan.record_queue_size = 1;
    let client = base.with_policies(policies);
    for i in 0..100 {
        client.put(&key("abort", i), &bins! { "i" => i }).await.unwrap();
    }

    let mut stream = client.scan(&Scan::new("test", Some("abort"))).unwrap();
    for _ in 0..3 {
        assert!(stream.next().await.unwrap().is_ok());
    }
    stream.abort();
    assert!(stream.next().await.is_none());
    assert_eq!(stream.state(), StreamState::Aborted);
}

#[tokio::test]
async fn test_query_integer_range() {
    let mock = MockCluster::start(2).await.unwrap();
    let client = connect(&mock).await;
    let job = client
        .create_integer_index("test", Some("people"), "age", "idx_age")
        .await
        .unwrap();
    job.wait_until_done(Duration::from_millis(10)).await.unwrap();

    for (i, age) in [17, 18, 25, 30, 31].iter().enumerate() {
        client
            .put(&key("people", i as i64), &bins! { "age" => *age })
            .await
            .unwrap();
    }

    let query = Query::new("test", Some("people"), Filter::range("age", 18, 30));
    let mut ages: Vec<i64> = client
        .query(&query)
        .unwrap()
        .map_ok(|r| r.bin("age").and_then(Value::as_int).unwrap_or(-1))
        .try_collect()
        .await
        .unwrap();
    ages.sort();
    assert_eq!(ages, vec![18, 25, 30]);
}

#[tokio::test]
async fn test_query_without_index_fails_stream() {
    let mock = MockCluster::start(1).await.unwrap();
    let client = connect(&mock).await;
    let query = Query::new("test", Some("people"), Filter::range("missing", 0, 1));
    let mut stream = client.query(&query).unwrap();
    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.result_code(), ResultCode::IndexNotFound);
    assert!(stream.next().await.is_none());
    assert_eq!(stream.state(), StreamState::Failed);
}

// ============================================================================
// Background jobs and indexes
// ============================================================================

#[tokio::test]
async fn test_background_scan_job_completes() {
    let mock = MockCluster::start(2).await.unwrap();
    let client = connect(&mock).await;
    for i in 0..20 {
        client.put(&key("jobs", i), &bins! { "i" => i }).await.unwrap();
    }

    let job = client
        .scan_background(
            &Scan::new("test", Some("jobs")),
            ECHO_MODULE,
            "put_bin",
            &[Value::from("flag"), Value::Int(1)],
        )
        .await
        .unwrap();
    let info = job.wait_until_done(Duration::from_millis(10)).await.unwrap();
    assert_eq!(info.status, JobStatus::Completed);
    assert_eq!(info.progress_pct, 100);
    assert_eq!(info.records_read, 20);

    let rec = client.get(&key("jobs", 7)).await.unwrap();
    assert_eq!(rec.bin("flag"), Some(&Value::Int(1)));
}

#[tokio::test]
async fn test_index_lifecycle_errors() {
    let mock = MockCluster::start(1).await.unwrap();
    let client = connect(&mock).await;
    client
        .create_string_index("test", None, "name", "idx_name")
        .await
        .unwrap();
    let err = client
        .create_string_index("test", None, "name", "idx_name")
        .await
        .unwrap_err();
    assert_eq!(err.result_code(), ResultCode::IndexFound);

    client
        .index_create_wait("test", "idx_name", Duration::from_millis(10))
        .await
        .unwrap();
    client.index_remove("test", "idx_name").await.unwrap();
    let err = client.index_remove("test", "idx_name").await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::IndexNotFound);
}

// ============================================================================
// Info and cluster
// ============================================================================

#[tokio::test]
async fn test_info_variants() {
    let mock = MockCluster::start(3).await.unwrap();
    let client = connect(&mock).await;

    let all = client.info_all(&["node"]).await.unwrap();
    assert_eq!(all.len(), 3);
    for reply in &all {
        assert_eq!(reply.result.as_ref().unwrap()["node"], reply.node);
    }

    let name = mock.node(1).name().to_string();
    let one = client.info(&name, &["node"]).await.unwrap();
    assert_eq!(one["node"], name);

    let any = client.info_any(&["namespaces"]).await.unwrap();
    assert_eq!(any["namespaces"], "test");

    let host = aerie_cluster::Host::parse(&mock.seed(), 3000).unwrap();
    let direct = client.info_host(&host, &["cluster-name"]).await.unwrap();
    assert_eq!(direct["cluster-name"], "mock");

    assert_eq!(client.cluster_nodes().len(), 3);
    assert!(client.cluster_nodes().iter().all(|n| n.active));
}

#[tokio::test]
async fn test_close_rejects_commands() {
    let mock = MockCluster::start(1).await.unwrap();
    let client = connect(&mock).await;
    assert!(client.is_connected());
    client.close();
    assert!(!client.is_connected());
    let err = client.get(&key("crud", 1)).await.unwrap_err();
    assert!(matches!(err, Error::Connection { .. }));
}
