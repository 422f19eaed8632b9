//! Scans and secondary-index queries
//!
//! Both fan out to every active node with a shared task id. Foreground
//! requests return a [`RecordStream`]; background requests run a UDF on
//! each matching record server-side and return a [`Job`].

use std::sync::Arc;

use bytes::Bytes;
use tracing::info;

use aerie_cluster::Node;
use aerie_core::{
    BasePolicy, BinSelection, Error, Filter, Priority, QueryPolicy, Result, ScanPolicy,
};
use aerie_wire::command::{encode_query, encode_scan};
use aerie_wire::{ScanParams, UdfCall};

use crate::executor::{Command, Executor, Target};
use crate::job::{Job, JobModule};
use crate::stream::{RecordStream, StreamSettings};

/// A scan of a namespace or set.
///
/// ```
/// use aerie_client::Scan;
/// let scan = Scan::new("test", Some("demo")).select(&["name"]).percent(50);
/// assert_eq!(scan.namespace(), "test");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    namespace: String,
    set: Option<String>,
    bins: BinSelection,
    percent: u8,
    priority: Priority,
    concurrent: bool,
}

impl Scan {
    /// Scan every record of `namespace`, or of `set` within it.
    pub fn new(namespace: &str, set: Option<&str>) -> Self {
        Scan {
            namespace: namespace.to_string(),
            set: set.map(str::to_string),
            bins: BinSelection::All,
            percent: 100,
            priority: Priority::Default,
            concurrent: true,
        }
    }

    /// Return only the named bins.
    pub fn select<S: AsRef<str>>(mut self, bins: &[S]) -> Self {
        self.bins = BinSelection::named(bins);
        self
    }

    /// Return metadata only.
    pub fn no_bins(mut self) -> Self {
        self.bins = BinSelection::Header;
        self
    }

    /// Sample this percentage of partitions (1..=100).
    pub fn percent(mut self, percent: u8) -> Self {
        self.percent = percent;
        self
    }

    /// Server scheduling priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Scan nodes in parallel (default) or one after another.
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    /// Namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn params(&self, policy: &ScanPolicy) -> ScanParams {
        ScanParams {
            bins: self.bins.clone(),
            percent: self.percent,
            priority: self.priority,
            fail_on_cluster_change: policy.fail_on_cluster_change,
        }
    }
}

/// A secondary-index query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    namespace: String,
    set: Option<String>,
    filter: Filter,
    index_name: Option<String>,
    bins: BinSelection,
}

impl Query {
    /// Records of `namespace` (and `set`) matching `filter`.
    pub fn new(namespace: &str, set: Option<&str>, filter: Filter) -> Self {
        Query {
            namespace: namespace.to_string(),
            set: set.map(str::to_string),
            filter,
            index_name: None,
            bins: BinSelection::All,
        }
    }

    /// Return only the named bins.
    pub fn select<S: AsRef<str>>(mut self, bins: &[S]) -> Self {
        self.bins = BinSelection::named(bins);
        self
    }

    /// Use this index instead of letting the server pick one by bin.
    pub fn index_name(mut self, name: &str) -> Self {
        self.index_name = Some(name.to_string());
        self
    }

    /// The filter.
    pub fn filter(&self) -> &Filter {
        &self.filter
    }
}

fn task_id() -> u64 {
    // zero means "no task" on the server
    rand::random::<u64>().max(1)
}

fn stream_nodes(executor: &Executor) -> Result<Vec<Arc<Node>>> {
    let nodes = executor.cluster().active_nodes();
    if nodes.is_empty() {
        return Err(Error::invalid_node("cluster has no active nodes"));
    }
    Ok(nodes)
}

pub(crate) fn scan(executor: &Executor, scan: &Scan, policy: &ScanPolicy) -> Result<RecordStream> {
    let nodes = stream_nodes(executor)?;
    let request = encode_scan(
        &scan.namespace,
        scan.set.as_deref(),
        &scan.params(policy),
        task_id(),
        policy.base.timeout_ms,
        None,
    )?;
    let settings = StreamSettings {
        base: policy.base.clone(),
        queue_size: policy.record_queue_size,
        concurrent: scan.concurrent,
        conn_timeout: executor.cluster().config().conn_timeout,
    };
    Ok(RecordStream::spawn(nodes, request, settings))
}

pub(crate) fn query(
    executor: &Executor,
    query: &Query,
    policy: &QueryPolicy,
) -> Result<RecordStream> {
    let nodes = stream_nodes(executor)?;
    let request = encode_query(
        &query.namespace,
        query.set.as_deref(),
        query.index_name.as_deref(),
        &query.filter,
        &query.bins,
        task_id(),
        policy.base.timeout_ms,
        None,
    )?;
    let settings = StreamSettings {
        base: policy.base.clone(),
        queue_size: policy.record_queue_size,
        concurrent: true,
        conn_timeout: executor.cluster().config().conn_timeout,
    };
    Ok(RecordStream::spawn(nodes, request, settings))
}

pub(crate) async fn scan_background(
    executor: &Executor,
    scan: &Scan,
    udf: &UdfCall,
    policy: &ScanPolicy,
) -> Result<Job> {
    let id = task_id();
    let request = encode_scan(
        &scan.namespace,
        scan.set.as_deref(),
        &scan.params(policy),
        id,
        policy.base.timeout_ms,
        Some(udf),
    )?;
    start_job(executor, request, &policy.base, id, JobModule::Scan).await
}

pub(crate) async fn query_background(
    executor: &Executor,
    query: &Query,
    udf: &UdfCall,
    policy: &QueryPolicy,
) -> Result<Job> {
    let id = task_id();
    let request = encode_query(
        &query.namespace,
        query.set.as_deref(),
        query.index_name.as_deref(),
        &query.filter,
        &query.bins,
        id,
        policy.base.timeout_ms,
        Some(udf),
    )?;
    start_job(executor, request, &policy.base, id, JobModule::Query).await
}

async fn start_job(
    executor: &Executor,
    request: Bytes,
    base: &BasePolicy,
    id: u64,
    module: JobModule,
) -> Result<Job> {
    for node in stream_nodes(executor)? {
        let cmd = Command {
            name: module.as_str(),
            target: Target::Node(node),
            policy: base,
            idempotent: false,
        };
        for resp in executor.execute_multi(&cmd, &request).await? {
            if resp.last && !resp.result_code.is_ok() {
                return Err(Error::from_code(resp.result_code));
            }
        }
    }
    info!(target: "aerie::exec", job = id, module = module.as_str(), "Started background job");
    Ok(Job::new(executor.clone(), id, module))
}
