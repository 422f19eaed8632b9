//! Tending and routing against an in-process mock cluster
//!
//! ```bash
//! cargo test -p aerie-cluster --test tending
//! ```

use std::time::Duration;

use aerie_cluster::{Cluster, ClusterConfig, Credentials, Host, DEFAULT_PORT};
use aerie_core::{ConnAcquire, Error, Key, Replica};
use aerie_testing::MockCluster;

// ============================================================================
// Helpers
// ============================================================================

fn config_for(mock: &MockCluster) -> ClusterConfig {
    ClusterConfig {
        seeds: vec![Host::parse(&mock.seed(), DEFAULT_PORT).unwrap()],
        conn_timeout: Duration::from_millis(500),
        // tests drive cycles by hand
        tend_interval: Duration::from_secs(3600),
        max_tend_failures: 2,
        ..Default::default()
    }
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_connect_discovers_every_node_from_one_seed() {
    let mock = MockCluster::start(3).await.unwrap();
    let cluster = Cluster::connect(config_for(&mock)).await.unwrap();

    let mut names: Vec<String> = cluster.nodes().iter().map(|n| n.name().to_string()).collect();
    names.sort();
    let mut expected: Vec<String> = mock.nodes().iter().map(|n| n.name().to_string()).collect();
    expected.sort();
    assert_eq!(names, expected);
    assert!(cluster.is_connected());
    cluster.close();
}

#[tokio::test]
async fn test_connect_fails_without_reachable_seed() {
    let mock = MockCluster::start(1).await.unwrap();
    let config = config_for(&mock);
    mock.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let err = Cluster::connect(config).await.unwrap_err();
    assert!(matches!(err, Error::Connection { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_cluster_name_mismatch_rejects_seed() {
    let mock = MockCluster::builder().cluster_name("east").start().await.unwrap();
    let mut config = config_for(&mock);
    config.cluster_name = Some("west".into());
    assert!(Cluster::connect(config).await.is_err());

    let mut config = config_for(&mock);
    config.cluster_name = Some("east".into());
    assert!(Cluster::connect(config).await.is_ok());
}

#[tokio::test]
async fn test_login_required() {
    let mock = MockCluster::builder().user("admin", "secret").start().await.unwrap();

    let mut config = config_for(&mock);
    config.credentials = Some(Credentials::new("admin", "wrong"));
    assert!(Cluster::connect(config).await.is_err());

    let mut config = config_for(&mock);
    config.credentials = Some(Credentials::new("admin", "secret"));
    let cluster = Cluster::connect(config).await.unwrap();
    let node = cluster.random_node().unwrap();
    let info = node.info(&["namespaces"], Duration::from_secs(1)).await.unwrap();
    assert_eq!(info["namespaces"], "test");
}

// ============================================================================
// Node health
// ============================================================================

#[tokio::test]
async fn test_stopped_node_is_deactivated_then_removed() {
    let mock = MockCluster::start(3).await.unwrap();
    let cluster = Cluster::connect(config_for(&mock)).await.unwrap();
    let stopped = mock.node(2).name().to_string();
    mock.node(2).stop();

    let first = cluster.tend().await;
    assert_eq!(first.failed, 1);
    assert!(cluster.node(&stopped).unwrap().is_active());

    let second = cluster.tend().await;
    assert_eq!(second.removed, vec![stopped.clone()]);
    assert!(cluster.node(&stopped).is_err());
    assert_eq!(cluster.active_nodes().len(), 2);
}

#[tokio::test]
async fn test_total_failure_keeps_previous_snapshot() {
    let mock = MockCluster::start(2).await.unwrap();
    let cluster = Cluster::connect(config_for(&mock)).await.unwrap();
    let before = cluster.snapshot().version;
    for n in mock.nodes() {
        n.fail_info(true);
    }
    let report = cluster.tend().await;
    assert!(!report.swapped);
    assert_eq!(cluster.snapshot().version, before);
    assert_eq!(cluster.nodes().len(), 2);
}

#[tokio::test]
async fn test_partition_generation_tracked() {
    let mock = MockCluster::start(1).await.unwrap();
    let cluster = Cluster::connect(config_for(&mock)).await.unwrap();
    mock.node(0).set_partition_generation(42);
    cluster.tend().await;
    assert_eq!(cluster.nodes()[0].partition_generation(), 42);
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_master_routing_matches_ownership() {
    let mock = MockCluster::start(3).await.unwrap();
    let cluster = Cluster::connect(config_for(&mock)).await.unwrap();
    for i in 0..50 {
        let key = Key::new("test", "demo", i as i64).unwrap();
        let node = cluster.route(&key, Replica::Master, false).unwrap();
        assert_eq!(node.name(), mock.master_of(key.digest()).name());
    }
}

#[tokio::test]
async fn test_any_replica_alternates_between_copies() {
    let mock = MockCluster::start(2).await.unwrap();
    let cluster = Cluster::connect(config_for(&mock)).await.unwrap();
    let key = Key::new("test", "demo", "k").unwrap();
    let picks: Vec<String> = (0..4)
        .map(|_| cluster.route(&key, Replica::Any, false).unwrap().name().to_string())
        .collect();
    assert_ne!(picks[0], picks[1]);
    assert_eq!(picks[0], picks[2]);
    assert_eq!(picks[1], picks[3]);
}

#[tokio::test]
async fn test_unknown_namespace_is_invalid_node() {
    let mock = MockCluster::start(1).await.unwrap();
    let cluster = Cluster::connect(config_for(&mock)).await.unwrap();
    let key = Key::new("missing", "demo", "k").unwrap();
    let err = cluster.route(&key, Replica::Master, false).unwrap_err();
    assert!(matches!(err, Error::InvalidNode { .. }));
}

// ============================================================================
// Pool
// ============================================================================

#[tokio::test]
async fn test_node_pool_reuses_connections() {
    let mock = MockCluster::start(1).await.unwrap();
    let mut config = config_for(&mock);
    config.max_conns_per_node = 1;
    let cluster = Cluster::connect(config).await.unwrap();
    let node = cluster.random_node().unwrap();

    let conn = node.pool().acquire(ConnAcquire::FailFast, Duration::ZERO).await.unwrap();
    let err = node
        .pool()
        .acquire(ConnAcquire::FailFast, Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoMoreConnections { .. }));
    conn.release(true);

    let again = node.pool().acquire(ConnAcquire::FailFast, Duration::ZERO).await.unwrap();
    again.release(true);
    assert_eq!(node.pool_stats().opened, 1);
}

#[tokio::test]
async fn test_saturated_pool_does_not_fail_tending() {
    let mock = MockCluster::start(1).await.unwrap();
    let mut config = config_for(&mock);
    config.max_conns_per_node = 1;
    let cluster = Cluster::connect(config).await.unwrap();
    let node = cluster.random_node().unwrap();

    // commands hold every pooled connection across two cycles
    let held = node.pool().acquire(ConnAcquire::FailFast, Duration::ZERO).await.unwrap();
    for _ in 0..2 {
        let report = cluster.tend().await;
        assert_eq!(report.refreshed, 1, "{:?}", report);
        assert_eq!(report.failed, 0, "{:?}", report);
    }
    assert!(node.is_active());
    assert_eq!(node.failures(), 0);
    held.release(true);

    let key = Key::new("test", "demo", "k1").unwrap();
    let owner = cluster.route(&key, Replica::Master, false).unwrap();
    assert_eq!(owner.name(), node.name());
    assert_eq!(node.pool_stats().opened, 1);
}

#[tokio::test]
async fn test_tend_reconnects_after_dropped_connection() {
    let mock = MockCluster::start(1).await.unwrap();
    let cluster = Cluster::connect(config_for(&mock)).await.unwrap();
    let node = cluster.random_node().unwrap();

    mock.node(0).fail_info(true);
    let report = cluster.tend().await;
    assert_eq!(report.failed, 1);
    mock.node(0).fail_info(false);

    let report = cluster.tend().await;
    assert_eq!(report.refreshed, 1, "{:?}", report);
    assert!(node.is_active());
}
