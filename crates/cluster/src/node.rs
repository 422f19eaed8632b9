//! Cluster nodes

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use aerie_core::{ConnAcquire, Error, Result};

use crate::connection::{Connection, Credentials};
use crate::host::Host;
use crate::partition::ReplicaMap;
use crate::pool::{Pool, PoolConfig, PoolStats};

/// A server node known to the cluster.
///
/// Nodes are shared through `Arc`; a node removed from the cluster stays
/// alive until the last in-flight command referencing it finishes.
///
/// Tending talks to the node over its own connection, outside the pool, so
/// a pool saturated by commands never starves the health check.
pub struct Node {
    name: String,
    host: Host,
    addr: SocketAddr,
    pool: Arc<Pool>,
    tend_conn: Mutex<Option<Connection>>,
    conn_timeout: Duration,
    credentials: Option<Credentials>,
    partition_generation: AtomicI64,
    active: AtomicBool,
    failures: AtomicU32,
    replicas: RwLock<Option<Arc<ReplicaMap>>>,
    peers: RwLock<Vec<Host>>,
}

impl Node {
    /// Node with an empty pool.
    pub fn new(name: impl Into<String>, host: Host, addr: SocketAddr, pool: PoolConfig) -> Arc<Self> {
        let name = name.into();
        Arc::new(Node {
            tend_conn: Mutex::new(None),
            conn_timeout: pool.conn_timeout,
            credentials: pool.credentials.clone(),
            pool: Pool::new(name.clone(), addr, pool),
            name,
            host,
            addr,
            partition_generation: AtomicI64::new(-1),
            active: AtomicBool::new(true),
            failures: AtomicU32::new(0),
            replicas: RwLock::new(None),
            peers: RwLock::new(Vec::new()),
        })
    }

    /// Node id reported by the server.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host the node was discovered as.
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Resolved socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connection pool.
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Pool counters.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Last reported partition generation, `-1` before the first tend.
    pub fn partition_generation(&self) -> i64 {
        self.partition_generation.load(Ordering::Acquire)
    }

    pub(crate) fn set_partition_generation(&self, generation: i64) {
        self.partition_generation.store(generation, Ordering::Release);
    }

    /// Eligible for routing.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Consecutive failed tend cycles.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// Record a successful tend; reactivates the node.
    pub(crate) fn tend_succeeded(&self) {
        self.failures.store(0, Ordering::Release);
        self.active.store(true, Ordering::Release);
    }

    /// Record a failed tend. Returns true when this failure deactivated the node.
    pub(crate) fn tend_failed(&self, max_failures: u32) -> bool {
        let n = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        n >= max_failures && self.active.swap(false, Ordering::AcqRel)
    }

    /// Partition ownership last reported by the node.
    pub fn replicas(&self) -> Option<Arc<ReplicaMap>> {
        self.replicas.read().clone()
    }

    pub(crate) fn set_replicas(&self, map: ReplicaMap) {
        *self.replicas.write() = Some(Arc::new(map));
    }

    /// Peers last advertised by the node.
    pub fn peers(&self) -> Vec<Host> {
        self.peers.read().clone()
    }

    pub(crate) fn set_peers(&self, peers: Vec<Host>) {
        *self.peers.write() = peers;
    }

    /// Run info commands over a pooled connection.
    pub async fn info(&self, commands: &[&str], timeout: Duration) -> Result<BTreeMap<String, String>> {
        let mut conn = self.pool.acquire(ConnAcquire::Wait, timeout).await?;
        let res = tokio::time::timeout(timeout, conn.info(commands))
            .await
            .map_err(|_| Error::timeout(format!("info request to node {} timed out", self.name)))
            .and_then(|r| r);
        conn.release(res.is_ok());
        res
    }

    /// Run info commands over the node's tend connection.
    ///
    /// The connection is opened (and logged in) on first use and dropped
    /// after any failure, so the next cycle reconnects.
    pub async fn tend_info(&self, commands: &[&str], timeout: Duration) -> Result<BTreeMap<String, String>> {
        let mut slot = self.tend_conn.lock().await;
        let res = tokio::time::timeout(timeout, async {
            if slot.is_none() {
                *slot = Some(self.open_tend_connection().await?);
            }
            match slot.as_mut() {
                Some(conn) => conn.info(commands).await,
                None => Err(Error::connection(format!("no tend connection to node {}", self.name))),
            }
        })
        .await
        .map_err(|_| Error::timeout(format!("tend request to node {} timed out", self.name)))
        .and_then(|r| r);
        if res.is_err() {
            *slot = None;
        }
        res
    }

    /// Install an already logged-in connection as the tend connection.
    pub(crate) async fn adopt_tend_connection(&self, conn: Connection) {
        *self.tend_conn.lock().await = Some(conn);
    }

    async fn open_tend_connection(&self) -> Result<Connection> {
        let mut conn = Connection::connect(self.addr, self.conn_timeout).await?;
        if let Some(creds) = &self.credentials {
            conn.login(creds).await?;
        }
        Ok(conn)
    }

    /// Close the node's pool and tend connection.
    pub fn close(&self) {
        self.pool.close();
        if let Ok(mut slot) = self.tend_conn.try_lock() {
            slot.take();
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .field("active", &self.is_active())
            .field("partition_generation", &self.partition_generation())
            .finish()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Arc<Node> {
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        Node::new("A", Host::from(addr), addr, PoolConfig::default())
    }

    #[test]
    fn test_deactivates_after_max_failures() {
        let n = node();
        assert!(!n.tend_failed(3));
        assert!(!n.tend_failed(3));
        assert!(n.tend_failed(3));
        assert!(!n.is_active());
        // further failures do not report a second transition
        assert!(!n.tend_failed(3));
        n.tend_succeeded();
        assert!(n.is_active());
        assert_eq!(n.failures(), 0);
    }

    #[test]
    fn test_generation_starts_unknown() {
        let n = node();
        assert_eq!(n.partition_generation(), -1);
        n.set_partition_generation(7);
        assert_eq!(n.partition_generation(), 7);
    }
}
