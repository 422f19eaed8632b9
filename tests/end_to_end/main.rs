//! End-to-end tests
//!
//! The public `aerie` API against an in-process mock cluster, organized by
//! concern:
//! - Retry: transport failures, idempotence and timeouts
//! - Pool: per-node connection limits
//! - Routing: commands reach the partition owner; node loss
//! - Auth: login and cluster name checks
//! - Scenarios: record, UDF, query and job workflows
//!
//! ```bash
//! cargo test --test end_to_end
//! ```

#[path = "../common/mod.rs"]
mod common;

mod auth;
mod pool;
mod retry;
mod routing;
mod scenarios;
