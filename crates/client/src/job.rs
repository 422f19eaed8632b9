//! Background job and index build tracking

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::debug;

use aerie_core::{Error, Result, ResultCode};
use aerie_wire::info::{info_error, parse_pairs};

use crate::executor::Executor;

/// Job status, aggregated across nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// No node knows the job
    Undef,
    /// At least one node is still running it
    InProgress,
    /// Every node that ran it has finished
    Completed,
}

/// Progress of a background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobInfo {
    /// Aggregated status
    pub status: JobStatus,
    /// Mean progress across reporting nodes, 0..=100
    pub progress_pct: u32,
    /// Records processed across nodes
    pub records_read: u64,
}

/// Kind of background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobModule {
    /// Background scan
    Scan,
    /// Background query
    Query,
}

impl JobModule {
    /// Module name used by the `jobs` info command.
    pub fn as_str(self) -> &'static str {
        match self {
            JobModule::Scan => "scan",
            JobModule::Query => "query",
        }
    }
}

/// A background scan or query running on the cluster.
#[derive(Debug, Clone)]
pub struct Job {
    executor: Executor,
    id: u64,
    module: JobModule,
}

impl Job {
    pub(crate) fn new(executor: Executor, id: u64, module: JobModule) -> Self {
        Job {
            executor,
            id,
            module,
        }
    }

    /// Task id shared by every node.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Job kind.
    pub fn module(&self) -> JobModule {
        self.module
    }

    fn info_command(&self) -> String {
        format!(
            "jobs:module={};cmd=get-job;trid={}",
            self.module.as_str(),
            self.id
        )
    }

    /// Ask every active node for the job's progress.
    ///
    /// A node that cannot be reached is an error, not a status.
    pub async fn info(&self) -> Result<JobInfo> {
        let cluster = self.executor.cluster();
        let timeout = cluster.config().conn_timeout;
        let cmd = self.info_command();
        let mut reports = Vec::new();
        for node in cluster.active_nodes() {
            let mut res = node.info(&[cmd.as_str()], timeout).await?;
            let value = res.remove(&cmd).unwrap_or_default();
            reports.push(parse_job_report(&value)?);
        }
        Ok(aggregate(&reports))
    }

    /// Poll [`info`](Self::info) every `poll` until the job completes.
    pub async fn wait_until_done(&self, poll: Duration) -> Result<JobInfo> {
        loop {
            let info = self.info().await?;
            if info.status == JobStatus::Completed {
                return Ok(info);
            }
            debug!(
                target: "aerie::exec",
                job = self.id,
                progress = info.progress_pct,
                "Waiting for background job"
            );
            tokio::time::sleep(poll).await;
        }
    }
}

/// One node's view of a job; `None` when the node does not know it.
type NodeReport = Option<(bool, u32, u64)>;

/// Parse `module=scan:trid=7:status=done(ok):job-progress=100:recs-read=12`.
fn parse_job_report(value: &str) -> Result<NodeReport> {
    if let Some(err) = info_error(value) {
        return match err.result_code() {
            ResultCode::RecordNotFound => Ok(None),
            _ => Err(err),
        };
    }
    let fields: BTreeMap<&str, &str> = value
        .split(':')
        .filter_map(|kv| kv.split_once('='))
        .collect();
    let status = fields
        .get("status")
        .ok_or_else(|| Error::protocol(format!("job report without status: {}", value)))?;
    let done = status.starts_with("done");
    let progress = fields
        .get("job-progress")
        .and_then(|p| p.parse().ok())
        .unwrap_or(if done { 100 } else { 0 });
    let records = fields
        .get("recs-read")
        .and_then(|r| r.parse().ok())
        .unwrap_or(0);
    Ok(Some((done, progress, records)))
}

fn aggregate(reports: &[NodeReport]) -> JobInfo {
    let known: Vec<&(bool, u32, u64)> = reports.iter().flatten().collect();
    if known.is_empty() {
        return JobInfo {
            status: JobStatus::Undef,
            progress_pct: 0,
            records_read: 0,
        };
    }
    let status = if known.iter().all(|r| r.0) {
        JobStatus::Completed
    } else {
        JobStatus::InProgress
    };
    let progress = known.iter().map(|r| r.1).sum::<u32>() / known.len() as u32;
    JobInfo {
        status,
        progress_pct: progress.min(100),
        records_read: known.iter().map(|r| r.2).sum(),
    }
}

/// A secondary index being built.
#[derive(Debug, Clone)]
pub struct IndexJob {
    executor: Executor,
    namespace: String,
    name: String,
}

impl IndexJob {
    pub(crate) fn new(executor: Executor, namespace: &str, name: &str) -> Self {
        IndexJob {
            executor,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lowest `load_pct` across active nodes.
    pub async fn load_pct(&self) -> Result<u32> {
        let cluster = self.executor.cluster();
        let timeout = cluster.config().conn_timeout;
        let cmd = format!("sindex/{}/{}", self.namespace, self.name);
        let mut lowest = 100;
        for node in cluster.active_nodes() {
            let mut res = node.info(&[cmd.as_str()], timeout).await?;
            let value = res.remove(&cmd).unwrap_or_default();
            lowest = lowest.min(parse_load_pct(&value)?);
        }
        Ok(lowest)
    }

    /// Poll every `poll` until every node reports the index fully loaded.
    pub async fn wait_until_done(&self, poll: Duration) -> Result<()> {
        loop {
            let pct = self.load_pct().await?;
            if pct >= 100 {
                return Ok(());
            }
            debug!(
                target: "aerie::exec",
                index = %self.name,
                load_pct = pct,
                "Waiting for index build"
            );
            tokio::time::sleep(poll).await;
        }
    }
}

fn parse_load_pct(value: &str) -> Result<u32> {
    if let Some(err) = info_error(value) {
        // not yet visible on this node
        if err.result_code() == ResultCode::IndexNotFound {
            return Ok(0);
        }
        return Err(err);
    }
    parse_pairs(value)
        .get("load_pct")
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| Error::protocol(format!("sindex status without load_pct: {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_done_report() {
        let r = parse_job_report("module=scan:trid=7:status=done(ok):job-progress=100:recs-read=12")
            .unwrap();
        assert_eq!(r, Some((true, 100, 12)));
    }

    #[test]
    fn test_unknown_job_is_none() {
        assert_eq!(parse_job_report("ERROR:2:job not found").unwrap(), None);
        assert!(parse_job_report("ERROR:4:missing trid").is_err());
        assert!(parse_job_report("garbage").is_err());
    }

    #[test]
    fn test_aggregate_statuses() {
        assert_eq!(aggregate(&[None, None]).status, JobStatus::Undef);
        let info = aggregate(&[Some((true, 100, 3)), Some((false, 0, 1)), None]);
        assert_eq!(info.status, JobStatus::InProgress);
        assert_eq!(info.progress_pct, 50);
        assert_eq!(info.records_read, 4);
        assert_eq!(aggregate(&[Some((true, 100, 3)), None]).status, JobStatus::Completed);
    }

    #[test]
    fn test_load_pct() {
        assert_eq!(parse_load_pct("load_pct=100;state=RW").unwrap(), 100);
        assert_eq!(parse_load_pct("FAIL:201:Index does not exist").unwrap(), 0);
        assert!(parse_load_pct("state=RW").is_err());
    }
}
