//! Connection Pool Tests
//!
//! A node never has more than `max_conns_per_node` connections checked
//! out. Exhaustion fails fast or waits, per policy.

use std::time::Duration;

use aerie::ConnAcquire;

use crate::common::*;

async fn single_conn_client(mock: &MockCluster) -> Client {
    let mut config = config_for(mock);
    config.max_conns_per_node = 1;
    Client::connect(&config).await.unwrap()
}

#[tokio::test]
async fn exhausted_pool_fails_fast() {
    let mock = MockCluster::start(1).await.unwrap();
    let client = single_conn_client(&mock).await;
    let k = key("pool", 1);
    client.put(&k, &bins! { "a" => 1 }).await.unwrap();

    mock.node(0).set_delay(Duration::from_millis(300));
    let busy = {
        let client = client.clone();
        let k = k.clone();
        tokio::spawn(async move { client.get(&k).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = client.get(&k).await.unwrap_err();
    assert!(matches!(err, Error::NoMoreConnections { .. }), "{:?}", err);
    assert_eq!(err.result_code(), ResultCode::NoMoreConnections);

    assert!(busy.await.unwrap().is_ok());
}

#[tokio::test]
async fn exhausted_pool_waits_for_release() {
    let mock = MockCluster::start(1).await.unwrap();
    let base = single_conn_client(&mock).await;
    let mut policies = base.policies().clone();
    policies.read.base.conn_acquire = ConnAcquire::Wait;
    policies.read.base.timeout_ms = 2000;
    let client = base.with_policies(policies);
    let k = key("pool", 2);
    client.put(&k, &bins! { "a" => 2 }).await.unwrap();

    mock.node(0).set_delay(Duration::from_millis(150));
    let busy = {
        let client = client.clone();
        let k = k.clone();
        tokio::spawn(async move { client.get(&k).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let rec = client.get(&k).await.unwrap();
    assert_eq!(rec.bin("a"), Some(&Value::Int(2)));
    assert!(busy.await.unwrap().is_ok());

    let stats = client.cluster().nodes()[0].pool_stats();
    assert_eq!(stats.in_use, 0);
    assert!(stats.opened <= 1);
}

#[tokio::test]
async fn sequential_commands_reuse_connections() {
    let mock = MockCluster::start(1).await.unwrap();
    let client = connect(&mock).await;
    for i in 0..20 {
        client.put(&key("pool", i), &bins! { "i" => i }).await.unwrap();
    }
    for i in 0..20 {
        assert!(client.exists(&key("pool", i)).await.unwrap());
    }
    let stats = client.cluster().nodes()[0].pool_stats();
    assert_eq!(stats.in_use, 0);
    assert!(stats.opened <= 2, "opened {}", stats.opened);
}

#[tokio::test]
async fn concurrent_commands_stay_within_limit() {
    let mock = MockCluster::start(1).await.unwrap();
    let mut config = config_for(&mock);
    config.max_conns_per_node = 4;
    config.policies.write.base.conn_acquire = ConnAcquire::Wait;
    config.policies.write.base.timeout_ms = 5000;
    let client = Client::connect(&config).await.unwrap();
    mock.node(0).set_delay(Duration::from_millis(20));

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.put(&key("pool-c", i), &bins! { "i" => i }).await })
        })
        .collect();
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    let stats = client.cluster().nodes()[0].pool_stats();
    assert!(stats.opened <= 4, "opened {}", stats.opened);
    assert_eq!(stats.in_use, 0);
}
