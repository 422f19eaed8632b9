//! In-process mock cluster for tests
//!
//! [`MockCluster`] starts one TCP listener per node on `127.0.0.1` and
//! answers info, login and message frames against a shared in-memory
//! [`Store`]. It covers what the client needs to be exercised end to end:
//! partition ownership and peer discovery through info, record reads and
//! writes with generation and existence checks, list and map operations,
//! batch reads, scans and secondary-index queries, background jobs and the
//! `echo` UDF module. Nodes can drop requests, delay responses or stop.
//!
//! ```no_run
//! # async fn demo() -> std::io::Result<()> {
//! let cluster = aerie_testing::MockCluster::start(3).await?;
//! let seed = cluster.seed();
//! cluster.node(1).drop_next_requests(1);
//! # Ok(()) }
//! ```

#![warn(missing_docs)]

pub mod cdt;
mod cluster;
mod server;
pub mod store;

pub use cluster::{MockCluster, MockClusterBuilder};
pub use server::{MockNode, ECHO_MODULE};
pub use store::{IndexDef, Store, StoredRecord};
