//! Cluster map
//!
//! The node set and partition table live together in one immutable
//! [`ClusterSnapshot`] behind an `ArcSwap`. Readers load the current
//! snapshot without locking; the tend task builds a replacement and swaps
//! it in whole, so a router never sees nodes from one cycle and partitions
//! from another.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use aerie_core::{Error, Key, Replica, Result};

use crate::connection::{Connection, Credentials};
use crate::host::Host;
use crate::node::Node;
use crate::partition::PartitionTable;
use crate::pool::PoolConfig;
use crate::router::Router;

const INITIAL_TEND_ROUNDS: usize = 4;

/// Cluster settings.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Seed hosts used until peers are discovered
    pub seeds: Vec<Host>,
    /// Expected cluster name; nodes reporting another name are rejected
    pub cluster_name: Option<String>,
    /// Login for every new connection
    pub credentials: Option<Credentials>,
    /// Socket connect timeout, also the per-node info timeout while tending
    pub conn_timeout: Duration,
    /// Time between tend cycles
    pub tend_interval: Duration,
    /// Connection cap per node
    pub max_conns_per_node: usize,
    /// Consecutive failed cycles before a node is deactivated
    pub max_tend_failures: u32,
    /// Idle connections older than this are closed
    pub max_socket_idle: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            seeds: vec![Host::new("localhost", crate::host::DEFAULT_PORT)],
            cluster_name: None,
            credentials: None,
            conn_timeout: Duration::from_millis(1000),
            tend_interval: Duration::from_millis(1000),
            max_conns_per_node: 300,
            max_tend_failures: 5,
            max_socket_idle: Duration::from_secs(55),
        }
    }
}

impl ClusterConfig {
    pub(crate) fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_conns: self.max_conns_per_node,
            conn_timeout: self.conn_timeout,
            max_socket_idle: self.max_socket_idle,
            credentials: self.credentials.clone(),
        }
    }
}

/// Nodes and partition table from one tend cycle.
#[derive(Debug, Default)]
pub struct ClusterSnapshot {
    /// Known nodes, sorted by name
    pub nodes: Vec<Arc<Node>>,
    /// Partition ownership
    pub table: PartitionTable,
    /// Number of tend cycles that produced a new snapshot
    pub version: u64,
}

/// A live view of the cluster, kept current by a background tend task.
pub struct Cluster {
    pub(crate) config: ClusterConfig,
    pub(crate) state: ArcSwap<ClusterSnapshot>,
    pub(crate) tend_lock: tokio::sync::Mutex<()>,
    router: Router,
    cancel: CancellationToken,
    closed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Cluster {
    /// Connect to the seeds, run the first tend cycle and start tending.
    ///
    /// Fails with a `Connection` error when no seed answers.
    pub async fn connect(config: ClusterConfig) -> Result<Arc<Self>> {
        if config.seeds.is_empty() {
            return Err(Error::parameter("no seed hosts configured"));
        }
        let cluster = Arc::new(Cluster {
            config,
            state: ArcSwap::from_pointee(ClusterSnapshot::default()),
            tend_lock: tokio::sync::Mutex::new(()),
            router: Router::new(),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            task: Mutex::new(None),
        });
        // seeds first, then the peers they advertise
        for _ in 0..INITIAL_TEND_ROUNDS {
            if cluster.tend().await.added.is_empty() {
                break;
            }
        }
        if cluster.snapshot().nodes.is_empty() {
            cluster.close();
            let seeds: Vec<String> = cluster.config.seeds.iter().map(|h| h.to_string()).collect();
            return Err(Error::connection(format!(
                "failed to connect to any seed host: {}",
                seeds.join(",")
            )));
        }
        let handle = crate::tend::spawn_tend_loop(&cluster, cluster.cancel.clone());
        *cluster.task.lock() = Some(handle);
        info!(
            target: "aerie::tend",
            nodes = cluster.snapshot().nodes.len(),
            "Connected to cluster"
        );
        Ok(cluster)
    }

    /// Settings this cluster was opened with.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<ClusterSnapshot> {
        self.state.load_full()
    }

    /// All known nodes.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.snapshot().nodes.clone()
    }

    /// Nodes eligible for routing.
    pub fn active_nodes(&self) -> Vec<Arc<Node>> {
        self.snapshot()
            .nodes
            .iter()
            .filter(|n| n.is_active())
            .cloned()
            .collect()
    }

    /// Node by name.
    pub fn node(&self, name: &str) -> Result<Arc<Node>> {
        self.snapshot()
            .nodes
            .iter()
            .find(|n| n.name() == name)
            .cloned()
            .ok_or_else(|| Error::invalid_node(format!("node {} not found", name)))
    }

    /// A random active node.
    pub fn random_node(&self) -> Result<Arc<Node>> {
        let nodes = self.active_nodes();
        if nodes.is_empty() {
            return Err(Error::invalid_node("cluster has no active nodes"));
        }
        let i = rand::thread_rng().gen_range(0..nodes.len());
        Ok(Arc::clone(&nodes[i]))
    }

    /// Node for `key` under `replica`.
    pub fn route(&self, key: &Key, replica: Replica, is_write: bool) -> Result<Arc<Node>> {
        let snapshot = self.state.load();
        self.router.route(&snapshot.table, key, replica, is_write)
    }

    /// True while open with at least one active node.
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.snapshot().nodes.iter().any(|n| n.is_active())
    }

    /// Stop tending and close every pool.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        for node in self.snapshot().nodes.iter() {
            node.close();
        }
        info!(target: "aerie::tend", "Cluster closed");
    }

    /// True after [`close`](Self::close).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("nodes", &self.snapshot().nodes)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Run info commands against a host outside the pool.
pub async fn info_host(
    host: &Host,
    commands: &[&str],
    timeout: Duration,
    credentials: Option<&Credentials>,
) -> Result<BTreeMap<String, String>> {
    let addr = host.resolve().await?[0];
    tokio::time::timeout(timeout, async {
        let mut conn = Connection::connect(addr, timeout).await?;
        if let Some(creds) = credentials {
            conn.login(creds).await?;
        }
        conn.info(commands).await
    })
    .await
    .map_err(|_| Error::timeout(format!("info request to {} timed out", host)))?
}
