//! Cluster discovery, partition routing and connection pooling
//!
//! - [`Cluster`]: node set and partition table, refreshed by a tend task
//! - [`Router`]: key to node under a replica policy
//! - [`Pool`]: bounded per-node connection pool with a checkout guard

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod connection;
pub mod host;
pub mod node;
pub mod partition;
pub mod pool;
pub mod router;
pub mod tend;

pub use cluster::{info_host, Cluster, ClusterConfig, ClusterSnapshot};
pub use connection::{Connection, Credentials};
pub use host::{Host, DEFAULT_PORT};
pub use node::Node;
pub use partition::{Bitmap, Owners, PartitionTable, ReplicaMap};
pub use pool::{Pool, PoolConfig, PoolStats, PooledConnection};
pub use router::Router;
pub use tend::TendReport;
