//! Per-node connection pool
//!
//! A semaphore bounds the number of connections checked out or idle at
//! `max_conns`. Acquiring takes a permit first, then reuses an idle
//! connection or opens a new one. The permit travels inside the
//! [`PooledConnection`] guard, so it returns to the pool on every exit path.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, trace};

use aerie_core::{ConnAcquire, Error, Result};

use crate::connection::{Connection, Credentials};

/// Pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on open connections
    pub max_conns: usize,
    /// Timeout for opening a socket
    pub conn_timeout: Duration,
    /// Idle connections older than this are closed
    pub max_socket_idle: Duration,
    /// Login sent on every new connection
    pub credentials: Option<Credentials>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_conns: 300,
            conn_timeout: Duration::from_millis(1000),
            max_socket_idle: Duration::from_secs(55),
            credentials: None,
        }
    }
}

/// Pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Connections currently checked out
    pub in_use: usize,
    /// Connections idle in the pool
    pub idle: usize,
    /// Connections opened since creation
    pub opened: u64,
    /// Connections closed since creation
    pub closed: u64,
}

/// Bounded pool of connections to one node.
#[derive(Debug)]
pub struct Pool {
    node: String,
    addr: SocketAddr,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<Connection>>,
    closed: AtomicBool,
    opened_total: AtomicU64,
    closed_total: AtomicU64,
}

impl Pool {
    /// Empty pool for the node at `addr`.
    pub fn new(node: impl Into<String>, addr: SocketAddr, config: PoolConfig) -> Arc<Self> {
        Arc::new(Pool {
            node: node.into(),
            addr,
            permits: Arc::new(Semaphore::new(config.max_conns)),
            config,
            idle: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            opened_total: AtomicU64::new(0),
            closed_total: AtomicU64::new(0),
        })
    }

    /// Node address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Check out a connection.
    ///
    /// With [`ConnAcquire::FailFast`] a saturated pool fails immediately with
    /// `NoMoreConnections`. With [`ConnAcquire::Wait`] the caller waits up to
    /// `wait` for a release.
    pub async fn acquire(
        self: &Arc<Self>,
        mode: ConnAcquire,
        wait: Duration,
    ) -> Result<PooledConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::connection(format!("pool for {} is closed", self.node)));
        }
        let permit = match mode {
            ConnAcquire::FailFast => match self.permits.clone().try_acquire_owned() {
                Ok(p) => p,
                Err(TryAcquireError::NoPermits) => {
                    return Err(Error::no_more_connections(&self.node))
                }
                Err(TryAcquireError::Closed) => {
                    return Err(Error::connection(format!("pool for {} is closed", self.node)))
                }
            },
            ConnAcquire::Wait => {
                match tokio::time::timeout(wait, self.permits.clone().acquire_owned()).await {
                    Ok(Ok(p)) => p,
                    Ok(Err(_)) => {
                        return Err(Error::connection(format!(
                            "pool for {} is closed",
                            self.node
                        )))
                    }
                    Err(_) => return Err(Error::no_more_connections(&self.node)),
                }
            }
        };

        if let Some(conn) = self.take_idle() {
            trace!(target: "aerie::pool", node = %self.node, "Reusing idle connection");
            return Ok(PooledConnection::new(conn, self.clone(), permit));
        }

        let mut conn = Connection::connect(self.addr, self.config.conn_timeout).await?;
        if let Some(creds) = &self.config.credentials {
            conn.login(creds).await?;
        }
        self.opened_total.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection::new(conn, self.clone(), permit))
    }

    fn take_idle(&self) -> Option<Connection> {
        let mut idle = self.idle.lock();
        while let Some(conn) = idle.pop_front() {
            if conn.idle_for() < self.config.max_socket_idle {
                return Some(conn);
            }
            self.closed_total.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    fn put_back(&self, conn: Connection) {
        if self.closed.load(Ordering::Acquire) {
            self.closed_total.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.idle.lock().push_front(conn);
    }

    /// Close idle connections that exceeded `max_socket_idle`.
    pub fn reap_idle(&self) -> usize {
        let mut idle = self.idle.lock();
        let before = idle.len();
        let limit = self.config.max_socket_idle;
        idle.retain(|c| c.idle_for() < limit);
        let reaped = before - idle.len();
        if reaped > 0 {
            self.closed_total.fetch_add(reaped as u64, Ordering::Relaxed);
            debug!(target: "aerie::pool", node = %self.node, reaped, "Reaped idle connections");
        }
        reaped
    }

    /// Close the pool. Checked-out connections close when released.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.permits.close();
        let mut idle = self.idle.lock();
        self.closed_total.fetch_add(idle.len() as u64, Ordering::Relaxed);
        idle.clear();
    }

    /// Current counters.
    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().len();
        PoolStats {
            in_use: self.config.max_conns - self.permits.available_permits(),
            idle,
            opened: self.opened_total.load(Ordering::Relaxed),
            closed: self.closed_total.load(Ordering::Relaxed),
        }
    }
}

/// A checked-out connection.
///
/// Call [`release`](Self::release) to return it. Dropping the guard
/// without a healthy release closes the socket.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<Pool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn new(conn: Connection, pool: Arc<Pool>, permit: OwnedSemaphorePermit) -> Self {
        PooledConnection {
            conn: Some(conn),
            pool,
            _permit: permit,
        }
    }

    /// Return the connection to the pool when `healthy`, otherwise close it.
    pub fn release(mut self, healthy: bool) {
        if let Some(conn) = self.conn.take() {
            if healthy {
                self.pool.put_back(conn);
            } else {
                self.pool.closed_total.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // conn is only taken by release(), which consumes self
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            self.pool.closed_total.fetch_add(1, Ordering::Relaxed);
            trace!(target: "aerie::pool", node = %self.pool.node, "Dropped connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn sink_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });
        addr
    }

    fn config(max: usize) -> PoolConfig {
        PoolConfig {
            max_conns: max,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fail_fast_when_exhausted() {
        let pool = Pool::new("A", sink_server().await, config(2));
        let a = pool.acquire(ConnAcquire::FailFast, Duration::ZERO).await.unwrap();
        let _b = pool.acquire(ConnAcquire::FailFast, Duration::ZERO).await.unwrap();
        let err = pool
            .acquire(ConnAcquire::FailFast, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoMoreConnections { .. }));
        a.release(true);
        assert!(pool.acquire(ConnAcquire::FailFast, Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_gets_released_connection() {
        let pool = Pool::new("A", sink_server().await, config(1));
        let held = pool.acquire(ConnAcquire::FailFast, Duration::ZERO).await.unwrap();
        let p = pool.clone();
        let waiter = tokio::spawn(async move {
            p.acquire(ConnAcquire::Wait, Duration::from_secs(2))
                .await
                .map(|c| c.release(true))
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        held.release(true);
        waiter.await.unwrap().unwrap();
        assert_eq!(pool.stats().opened, 1);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let pool = Pool::new("A", sink_server().await, config(1));
        let _held = pool.acquire(ConnAcquire::FailFast, Duration::ZERO).await.unwrap();
        let err = pool
            .acquire(ConnAcquire::Wait, Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoMoreConnections { .. }));
    }

    #[tokio::test]
    async fn test_drop_closes_and_returns_permit() {
        let pool = Pool::new("A", sink_server().await, config(1));
        let c = pool.acquire(ConnAcquire::FailFast, Duration::ZERO).await.unwrap();
        drop(c);
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.closed, 1);
        assert!(pool.acquire(ConnAcquire::FailFast, Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_healthy_release_reuses() {
        let pool = Pool::new("A", sink_server().await, config(4));
        for _ in 0..5 {
            pool.acquire(ConnAcquire::FailFast, Duration::ZERO)
                .await
                .unwrap()
                .release(true);
        }
        assert_eq!(pool.stats().opened, 1);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_reap_idle() {
        let pool = Pool::new(
            "A",
            sink_server().await,
            PoolConfig {
                max_socket_idle: Duration::from_millis(10),
                ..config(4)
            },
        );
        pool.acquire(ConnAcquire::FailFast, Duration::ZERO)
            .await
            .unwrap()
            .release(true);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(pool.reap_idle(), 1);
        assert_eq!(pool.stats().idle, 0);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects() {
        let pool = Pool::new("A", sink_server().await, config(1));
        pool.close();
        assert!(pool.acquire(ConnAcquire::Wait, Duration::from_millis(10)).await.is_err());
    }
}
