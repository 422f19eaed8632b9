//! Shared helpers for the workspace integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::time::Duration;

pub use aerie::{bins, Client, ClientConfig, Error, Key, ResultCode, Value};
pub use aerie_testing::{MockCluster, MockNode};

/// Config pointing at `mock` with background tending effectively off, so
/// tests drive cluster changes by hand.
pub fn config_for(mock: &MockCluster) -> ClientConfig {
    let mut config = ClientConfig::with_hosts(&mock.seed());
    config.conn_timeout_ms = 500;
    config.tend_interval_ms = 3_600_000;
    config
}

/// Connect with [`config_for`].
pub async fn connect(mock: &MockCluster) -> Client {
    Client::connect(&config_for(mock))
        .await
        .expect("connect to mock cluster")
}

/// Key in namespace `test`.
pub fn key(set: &str, i: i64) -> Key {
    Key::new("test", set, i).expect("valid key")
}

/// Mock node owning the master copy of `key`.
pub fn master<'a>(mock: &'a MockCluster, key: &Key) -> &'a MockNode {
    mock.master_of(key.digest())
}

/// Message requests seen by each node, in node order.
pub fn request_counts(mock: &MockCluster) -> Vec<u64> {
    mock.nodes().iter().map(|n| n.requests()).collect()
}

/// Short poll interval for job and index waits.
pub const POLL: Duration = Duration::from_millis(10);
