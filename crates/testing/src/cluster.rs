//! Mock cluster assembly

use std::collections::BTreeMap;
use std::sync::Arc;

use aerie_core::key::partition_id;
use aerie_core::Digest;
use aerie_wire::admin::hash_password;

use crate::server::{MockNode, Shared};
use crate::store::Store;

/// Builder for a [`MockCluster`].
#[derive(Debug, Clone)]
pub struct MockClusterBuilder {
    nodes: usize,
    replication: usize,
    cluster_name: String,
    namespaces: Vec<String>,
    users: Vec<(String, String)>,
}

impl Default for MockClusterBuilder {
    fn default() -> Self {
        MockClusterBuilder {
            nodes: 1,
            replication: 2,
            cluster_name: "mock".to_string(),
            namespaces: vec!["test".to_string()],
            users: Vec::new(),
        }
    }
}

impl MockClusterBuilder {
    /// Number of nodes.
    pub fn nodes(mut self, n: usize) -> Self {
        self.nodes = n.max(1);
        self
    }

    /// Copies of each partition, capped by the node count.
    pub fn replication(mut self, factor: usize) -> Self {
        self.replication = factor.clamp(1, 2);
        self
    }

    /// Name reported by `cluster-name`.
    pub fn cluster_name(mut self, name: &str) -> Self {
        self.cluster_name = name.to_string();
        self
    }

    /// Namespaces served.
    pub fn namespaces(mut self, names: &[&str]) -> Self {
        self.namespaces = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Require login; may be called several times.
    pub fn user(mut self, name: &str, password: &str) -> Self {
        self.users.push((name.to_string(), password.to_string()));
        self
    }

    /// Bind every node and start serving.
    pub async fn start(self) -> std::io::Result<MockCluster> {
        let users: BTreeMap<String, [u8; 32]> = self
            .users
            .iter()
            .map(|(u, p)| (u.clone(), hash_password(p)))
            .collect();
        let store = Arc::new(Store::new());
        let shared = Arc::new(Shared::new(
            Arc::clone(&store),
            self.cluster_name,
            self.namespaces,
            self.replication,
            users,
        ));
        let mut nodes = Vec::with_capacity(self.nodes);
        for i in 0..self.nodes {
            nodes.push(MockNode::bind(i, Arc::clone(&shared)).await?);
        }
        *shared.nodes.write() = nodes.clone();
        Ok(MockCluster {
            nodes,
            store,
            shared,
        })
    }
}

/// A set of mock nodes sharing one store.
pub struct MockCluster {
    nodes: Vec<MockNode>,
    store: Arc<Store>,
    shared: Arc<Shared>,
}

impl MockCluster {
    /// Start `n` nodes with default settings.
    pub async fn start(n: usize) -> std::io::Result<Self> {
        MockCluster::builder().nodes(n).start().await
    }

    /// Builder with defaults: one node, replication 2, namespace `test`,
    /// cluster name `mock`, no security.
    pub fn builder() -> MockClusterBuilder {
        MockClusterBuilder::default()
    }

    /// Every node, in name order.
    pub fn nodes(&self) -> &[MockNode] {
        &self.nodes
    }

    /// Node `i`.
    pub fn node(&self, i: usize) -> &MockNode {
        &self.nodes[i]
    }

    /// `host:port` of every node.
    pub fn hosts(&self) -> Vec<String> {
        self.nodes.iter().map(MockNode::host).collect()
    }

    /// `host:port` of the first node.
    pub fn seed(&self) -> String {
        self.nodes[0].host()
    }

    /// Records and indexes.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Node mastering `digest`.
    pub fn master_of(&self, digest: &Digest) -> &MockNode {
        let p = partition_id(digest);
        &self.nodes[p % self.nodes.len()]
    }

    /// Total message requests across nodes.
    pub fn requests(&self) -> u64 {
        self.nodes.iter().map(MockNode::requests).sum()
    }

    /// Stop every node.
    pub fn shutdown(&self) {
        for n in &self.nodes {
            n.stop();
        }
    }
}

impl Drop for MockCluster {
    fn drop(&mut self) {
        self.shutdown();
        // nodes hold the shared state; break the cycle
        self.shared.nodes.write().clear();
    }
}

impl std::fmt::Debug for MockCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCluster")
            .field("nodes", &self.nodes)
            .field("records", &self.store.len())
            .finish()
    }
}
