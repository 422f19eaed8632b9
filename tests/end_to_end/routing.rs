//! Routing Tests
//!
//! Commands go straight to the node owning the key's partition. Losing a
//! node only affects the partitions it owned.

use aerie::Replica;

use crate::common::*;

#[tokio::test]
async fn every_command_reaches_the_master() {
    let mock = MockCluster::start(3).await.unwrap();
    let client = connect(&mock).await;

    for i in 0..30 {
        let k = key("route", i);
        let owner = mock
            .nodes()
            .iter()
            .position(|n| n.name() == master(&mock, &k).name())
            .unwrap();
        let before = request_counts(&mock);
        client.put(&k, &bins! { "i" => i }).await.unwrap();
        client.get(&k).await.unwrap();
        let after = request_counts(&mock);
        for (n, (b, a)) in before.iter().zip(&after).enumerate() {
            let expected = if n == owner { b + 2 } else { *b };
            assert_eq!(*a, expected, "key {} node {}", i, n);
        }
    }
}

#[tokio::test]
async fn any_replica_reads_spread_over_copies() {
    let mock = MockCluster::start(3).await.unwrap();
    let base = connect(&mock).await;
    let k = key("route", 100);
    base.put(&k, &bins! { "a" => 1 }).await.unwrap();

    let mut policies = base.policies().clone();
    policies.read.replica = Replica::Any;
    let client = base.with_policies(policies);

    let before = request_counts(&mock);
    for _ in 0..4 {
        let rec = client.get(&k).await.unwrap();
        assert_eq!(rec.bin("a"), Some(&Value::Int(1)));
    }
    let after = request_counts(&mock);
    let hit: Vec<u64> = before.iter().zip(&after).map(|(b, a)| a - b).collect();
    // replication factor 2: two nodes serve two reads each
    assert_eq!(hit.iter().sum::<u64>(), 4);
    assert_eq!(hit.iter().filter(|&&h| h == 2).count(), 2);
}

#[tokio::test]
async fn lost_node_only_affects_its_partitions() {
    let mock = MockCluster::start(3).await.unwrap();
    let mut config = config_for(&mock);
    config.max_tend_failures = 1;
    let client = Client::connect(&config).await.unwrap();

    let keys: Vec<Key> = (0..60).map(|i| key("route-loss", i)).collect();
    for k in &keys {
        client.put(k, &bins! { "v" => 1 }).await.unwrap();
    }

    let lost = mock.node(2).name().to_string();
    mock.node(2).stop();
    client.cluster().tend().await;
    client.cluster().tend().await;
    assert!(client.cluster_nodes().iter().all(|n| n.name != lost));

    let mut served = 0;
    for k in &keys {
        let owned_by_lost = master(&mock, k).name() == lost;
        match client.get(k).await {
            Ok(rec) => {
                assert!(!owned_by_lost);
                assert_eq!(rec.bin("v"), Some(&Value::Int(1)));
                served += 1;
            }
            Err(e) => {
                assert!(owned_by_lost, "unexpected error {:?}", e);
            }
        }
    }
    assert!(served > 0);
}

#[tokio::test]
async fn batch_spans_every_node() {
    let mock = MockCluster::start(3).await.unwrap();
    let client = connect(&mock).await;
    let keys: Vec<Key> = (0..24).map(|i| key("route-batch", i)).collect();
    for (i, k) in keys.iter().enumerate() {
        if i % 2 == 0 {
            client.put(k, &bins! { "i" => i as i64 }).await.unwrap();
        }
    }

    let before = request_counts(&mock);
    let results = client.batch_get(&keys).await.unwrap();
    let after = request_counts(&mock);

    // one sub-request per node
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(a - b, 1);
    }
    for (i, r) in results.iter().enumerate() {
        assert_eq!(&r.key, &keys[i]);
        if i % 2 == 0 {
            assert_eq!(r.record.as_ref().unwrap().bin("i"), Some(&Value::Int(i as i64)));
        } else {
            assert_eq!(r.status, ResultCode::RecordNotFound);
            assert!(r.record.is_none());
        }
    }
}
