//! Batch reads
//!
//! Keys are grouped by the node mastering their partition and each group is
//! sent as one sub-request. Results come back in the caller's key order. A
//! key whose node cannot be routed or whose sub-request fails carries that
//! failure as its own status; the other keys are unaffected.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use aerie_cluster::Node;
use aerie_core::{BatchPolicy, BinSelection, Key, Record, Replica, ResultCode};
use aerie_wire::command::encode_batch;
use aerie_wire::BatchKey;

use crate::executor::{Command, Executor, Target};

/// One key of a batch read with its own bin selection.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRead {
    /// Record key
    pub key: Key,
    /// Bins to return
    pub bins: BinSelection,
}

impl BatchRead {
    /// Read every bin of `key`.
    pub fn all(key: Key) -> Self {
        BatchRead {
            key,
            bins: BinSelection::All,
        }
    }
}

/// Outcome for one key of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRecord {
    /// The key as requested
    pub key: Key,
    /// Status for this key
    pub status: ResultCode,
    /// Record, when the key was found
    pub record: Option<Record>,
}

impl BatchRecord {
    fn pending(key: Key) -> Self {
        BatchRecord {
            key,
            status: ResultCode::Ok,
            record: None,
        }
    }

    /// True when the record exists.
    pub fn exists(&self) -> bool {
        self.record.is_some()
    }

    /// True when the key was read successfully, found or not.
    pub fn is_ok(&self) -> bool {
        matches!(self.status, ResultCode::Ok | ResultCode::RecordNotFound)
    }
}

pub(crate) async fn batch_read(
    executor: &Executor,
    reads: &[BatchRead],
    policy: &BatchPolicy,
) -> Vec<BatchRecord> {
    let mut results: Vec<BatchRecord> = reads
        .iter()
        .map(|r| BatchRecord::pending(r.key.clone()))
        .collect();

    let mut groups: BTreeMap<String, (Arc<Node>, Vec<usize>)> = BTreeMap::new();
    for (i, read) in reads.iter().enumerate() {
        match executor.cluster().route(&read.key, Replica::Master, false) {
            Ok(node) => groups
                .entry(node.name().to_string())
                .or_insert_with(|| (node, Vec::new()))
                .1
                .push(i),
            Err(e) => results[i].status = e.result_code(),
        }
    }

    let jobs = groups
        .into_values()
        .map(|(node, indexes)| run_group(executor, node, reads, indexes, policy));
    let outcomes = if policy.concurrent {
        join_all(jobs).await
    } else {
        let mut out = Vec::new();
        for job in jobs {
            out.push(job.await);
        }
        out
    };

    for outcome in outcomes {
        for (i, status, record) in outcome {
            results[i].status = status;
            results[i].record = record;
        }
    }
    results
}

async fn run_group(
    executor: &Executor,
    node: Arc<Node>,
    reads: &[BatchRead],
    indexes: Vec<usize>,
    policy: &BatchPolicy,
) -> Vec<(usize, ResultCode, Option<Record>)> {
    let keys: Vec<BatchKey<'_>> = indexes
        .iter()
        .map(|&i| BatchKey {
            index: i as u32,
            key: &reads[i].key,
            bins: &reads[i].bins,
        })
        .collect();
    let node_name = node.name().to_string();
    let request = match encode_batch(&keys, policy) {
        Ok(r) => r,
        Err(e) => return fail_all(&indexes, e.result_code()),
    };
    let cmd = Command {
        name: "batch",
        target: Target::Node(node),
        policy: &policy.base,
        idempotent: true,
    };
    let replies = match executor.execute_multi(&cmd, &request).await {
        Ok(r) => r,
        Err(e) => {
            debug!(
                target: "aerie::exec",
                node = %node_name,
                keys = indexes.len(),
                error = %e,
                "Batch sub-request failed"
            );
            return fail_all(&indexes, e.result_code());
        }
    };

    let mut out = Vec::with_capacity(indexes.len());
    let mut final_status = ResultCode::Ok;
    for resp in replies {
        if resp.last {
            final_status = resp.result_code;
            continue;
        }
        let i = resp.batch_index as usize;
        if !indexes.contains(&i) {
            continue;
        }
        let record = resp
            .result_code
            .is_ok()
            .then(|| Record::new(reads[i].key.clone(), resp.bins, resp.metadata));
        out.push((i, resp.result_code, record));
    }
    // keys the node never answered take the stream's final status
    if out.len() < indexes.len() {
        let status = if final_status.is_ok() {
            ResultCode::Client
        } else {
            final_status
        };
        for &i in &indexes {
            if !out.iter().any(|(j, _, _)| *j == i) {
                out.push((i, status, None));
            }
        }
    }
    out
}

fn fail_all(indexes: &[usize], status: ResultCode) -> Vec<(usize, ResultCode, Option<Record>)> {
    indexes.iter().map(|&i| (i, status, None)).collect()
}
