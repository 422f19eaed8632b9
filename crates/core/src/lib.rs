//! Core types for the Aerie client
//!
//! This crate defines the data model shared by every layer:
//! - Key: namespace, set, user key and RIPEMD-160 digest
//! - Value: closed set of bin value variants
//! - Record / Metadata: bins plus generation, ttl and last-update time
//! - Operation: ordered server-side operations, including list and map ops
//! - Filter: secondary-index query predicates
//! - Policies: typed per-operation settings with documented defaults
//! - Error / ResultCode: error hierarchy with stable status codes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod filter;
pub mod key;
pub mod limits;
pub mod operations;
pub mod policy;
pub mod record;
pub mod result_code;
pub mod value;

pub use error::{Error, Origin, Result};
pub use filter::{Filter, IndexDataType, IndexType, Predicate};
pub use key::{Digest, Key, UserKey};
pub use operations::{OpKind, Operation};
pub use policy::{
    BasePolicy, BatchPolicy, CommitLevel, ConnAcquire, ConsistencyLevel, GenerationPolicy,
    InfoPolicy, KeyPolicy, Priority, QueryPolicy, ReadPolicy, RecordExistsAction, Replica,
    ScanPolicy, WritePolicy,
};
pub use record::{BinSelection, Bins, Metadata, Record, TTL_DONT_UPDATE, TTL_NAMESPACE_DEFAULT, TTL_NEVER_EXPIRE};
pub use result_code::{ErrorKind, ResultCode};
pub use value::{MapOrder, MapValue, ParticleType, Value};
