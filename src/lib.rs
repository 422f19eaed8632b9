//! Aerie - cluster-aware async client for partitioned key-value databases
//!
//! Aerie discovers the nodes of a cluster from one seed, keeps a map of
//! which node owns each of the 4096 partitions and sends every command
//! straight to the owning node over a pooled connection.
//!
//! # Quick Start
//!
//! ```no_run
//! use aerie::{bins, Client, ClientConfig, Key};
//!
//! # async fn demo() -> aerie::Result<()> {
//! let client = Client::connect(&ClientConfig::with_hosts("127.0.0.1:3000")).await?;
//! let key = Key::new("test", "users", "user:123")?;
//!
//! client.put(&key, &bins! { "name" => "Alice", "visits" => 1 }).await?;
//! client.incr(&key, &bins! { "visits" => 1 }).await?;
//!
//! let record = client.get(&key).await?;
//! assert_eq!(record.generation(), 2);
//! # Ok(()) }
//! ```
//!
//! # Layers
//!
//! - `aerie-core`: keys, values, records, operations, filters, policies, errors
//! - `aerie-wire`: frame and message codec, info protocol
//! - `aerie-cluster`: connections, pools, tending and partition routing
//! - `aerie-client`: the [`Client`] API on top of them
//!
//! Only the client API and the data model are re-exported here.

pub use aerie_client::*;

pub use aerie_cluster::Host;
pub use aerie_core::operations;
pub use aerie_core::{
    bins, BasePolicy, BatchPolicy, BinSelection, Bins, CommitLevel, ConnAcquire,
    ConsistencyLevel, Error, ErrorKind, Filter, GenerationPolicy, IndexDataType, IndexType,
    InfoPolicy, Key, KeyPolicy, MapOrder, MapValue, Metadata, Operation, Priority, QueryPolicy,
    ReadPolicy, Record, RecordExistsAction, Replica, Result, ResultCode, ScanPolicy, UserKey,
    Value, WritePolicy,
};
