//! Async client API for an Aerie cluster
//!
//! [`Client`] is the entry point. It connects through [`ClientConfig`],
//! keeps the cluster map current in the background and exposes:
//! - single-record commands: get, put, remove, operate, UDF apply
//! - batch reads with per-key status ([`BatchRecord`])
//! - scans and secondary-index queries as a [`RecordStream`]
//! - background jobs ([`Job`]) and index builds ([`IndexJob`])
//! - info requests against one node, any node or all nodes

#![warn(missing_docs)]
#![warn(clippy::all)]

mod batch;
mod client;
pub mod config;
mod executor;
mod index;
mod job;
mod scan;
mod stream;
mod udf;

pub use batch::{BatchRead, BatchRecord};
pub use client::{Client, ClusterNode, NodeInfo};
pub use config::{ClientConfig, ClientPolicies, HOSTS_ENV};
pub use index::IndexDefinition;
pub use job::{IndexJob, Job, JobInfo, JobModule, JobStatus};
pub use scan::{Query, Scan};
pub use stream::{RecordStream, StreamState};
pub use udf::{FAILURE_BIN, SUCCESS_BIN};
