//! Authentication and Cluster Identity Tests

use crate::common::*;

#[tokio::test]
async fn login_then_commands_succeed() {
    let mock = MockCluster::builder()
        .nodes(2)
        .user("admin", "secret")
        .start()
        .await
        .unwrap();
    let mut config = config_for(&mock);
    config.user = Some("admin".into());
    config.password = Some("secret".into());
    let client = Client::connect(&config).await.unwrap();

    let k = key("auth", 1);
    client.put(&k, &bins! { "a" => 1 }).await.unwrap();
    assert_eq!(client.get(&k).await.unwrap().bin("a"), Some(&Value::Int(1)));
    assert_eq!(client.cluster_nodes().len(), 2);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let mock = MockCluster::builder().user("admin", "secret").start().await.unwrap();
    let mut config = config_for(&mock);
    config.user = Some("admin".into());
    config.password = Some("nope".into());
    assert!(Client::connect(&config).await.is_err());
}

#[tokio::test]
async fn missing_credentials_are_rejected() {
    let mock = MockCluster::builder().user("admin", "secret").start().await.unwrap();
    assert!(Client::connect(&config_for(&mock)).await.is_err());
}

#[tokio::test]
async fn cluster_name_must_match() {
    let mock = MockCluster::builder().cluster_name("east").start().await.unwrap();

    let mut config = config_for(&mock);
    config.cluster_name = Some("west".into());
    assert!(Client::connect(&config).await.is_err());

    config.cluster_name = Some("east".into());
    let client = Client::connect(&config).await.unwrap();
    let info = client.info_any(&["cluster-name"]).await.unwrap();
    assert_eq!(info["cluster-name"], "east");
}

#[tokio::test]
async fn config_loaded_from_toml() {
    let mock = MockCluster::start(1).await.unwrap();
    let text = format!(
        r#"
hosts = ["{}"]
tend_interval_ms = 3600000

[policies.read]
timeout_ms = 200
max_retries = 3
"#,
        mock.seed()
    );
    let config = ClientConfig::from_toml_str(&text).unwrap();
    let client = Client::connect(&config).await.unwrap();
    assert_eq!(client.policies().read.base.max_retries, 3);

    let k = key("auth", 2);
    mock.node(0).drop_next_requests(3);
    client.put(&k, &bins! { "a" => 1 }).await.unwrap_err();
    // the put used up one drop; the read outlasts the other two
    let err = client.get(&k).await.unwrap_err();
    assert_eq!(err.result_code(), ResultCode::RecordNotFound);
}
