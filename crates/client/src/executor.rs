//! Command dispatch with per-attempt timeouts and retries
//!
//! One logical command runs as a sequence of attempts. Each attempt routes
//! the key again, checks a connection out of the node's pool, sends the
//! request and reads the reply under the per-attempt timeout. Transport
//! failures (I/O, connection, timeout) start another attempt while the
//! retry budget lasts and the command is idempotent. Server statuses are
//! returned to the caller as part of the decoded [`Response`] and are never
//! retried here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace};

use aerie_cluster::{Cluster, Connection, Node};
use aerie_core::{BasePolicy, Error, Key, Replica, Result};
use aerie_wire::proto::ProtoType;
use aerie_wire::response::{decode_response, decode_stream};
use aerie_wire::Response;

/// Where a command is sent.
#[derive(Debug, Clone)]
pub(crate) enum Target<'a> {
    /// Node owning the key's partition, resolved again on every attempt
    Key {
        key: &'a Key,
        replica: Replica,
        is_write: bool,
    },
    /// A fixed node
    Node(Arc<Node>),
}

/// A command ready to run.
#[derive(Debug, Clone)]
pub(crate) struct Command<'a> {
    pub name: &'static str,
    pub target: Target<'a>,
    pub policy: &'a BasePolicy,
    /// Transport failures may be retried
    pub idempotent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    /// One message in one frame
    Single,
    /// Frames until a message flagged last
    UntilLast,
}

/// Runs commands against the cluster.
#[derive(Debug, Clone)]
pub(crate) struct Executor {
    cluster: Arc<Cluster>,
}

impl Executor {
    pub fn new(cluster: Arc<Cluster>) -> Self {
        Executor { cluster }
    }

    pub fn cluster(&self) -> &Arc<Cluster> {
        &self.cluster
    }

    /// Run a single-record command.
    pub async fn execute(&self, cmd: &Command<'_>, request: &Bytes) -> Result<Response> {
        let mut replies = self.run(cmd, request, Reply::Single).await?;
        replies
            .pop()
            .ok_or_else(|| Error::protocol("empty response"))
    }

    /// Run a command answered by a message stream ending in a last message.
    pub async fn execute_multi(&self, cmd: &Command<'_>, request: &Bytes) -> Result<Vec<Response>> {
        self.run(cmd, request, Reply::UntilLast).await
    }

    async fn run(&self, cmd: &Command<'_>, request: &Bytes, reply: Reply) -> Result<Vec<Response>> {
        if self.cluster.is_closed() {
            return Err(Error::connection("client is closed"));
        }
        let deadline = cmd.policy.total_timeout().map(|t| Instant::now() + t);
        let attempts = attempt_count(cmd.policy.max_retries, cmd.idempotent);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let node = self.resolve(&cmd.target)?;
            let budget = attempt_budget(cmd.policy.timeout(), deadline)
                .ok_or_else(|| Error::timeout(format!("{} exceeded its total timeout", cmd.name)))?;
            trace!(
                target: "aerie::exec",
                command = cmd.name,
                node = %node.name(),
                attempt,
                "Sending command"
            );
            match self.attempt(&node, cmd, request, reply, budget).await {
                Ok(replies) => return Ok(replies),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    debug!(
                        target: "aerie::exec",
                        command = cmd.name,
                        node = %node.name(),
                        attempt,
                        error = %e,
                        "Retrying command"
                    );
                }
                Err(e) => {
                    debug!(
                        target: "aerie::exec",
                        command = cmd.name,
                        node = %node.name(),
                        attempt,
                        error = %e,
                        "Command failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    fn resolve(&self, target: &Target<'_>) -> Result<Arc<Node>> {
        match target {
            Target::Key {
                key,
                replica,
                is_write,
            } => self.cluster.route(key, *replica, *is_write),
            Target::Node(node) => {
                if node.is_active() {
                    Ok(Arc::clone(node))
                } else {
                    Err(Error::invalid_node(format!("node {} is not active", node.name())))
                }
            }
        }
    }

    async fn attempt(
        &self,
        node: &Arc<Node>,
        cmd: &Command<'_>,
        request: &Bytes,
        reply: Reply,
        budget: Option<Duration>,
    ) -> Result<Vec<Response>> {
        let wait = budget.unwrap_or(self.cluster.config().conn_timeout);
        let fut = async {
            let mut conn = node.pool().acquire(cmd.policy.conn_acquire, wait).await?;
            let res = exchange(&mut conn, request, reply).await;
            let healthy = match &res {
                Ok(_) => true,
                Err(e) => !e.poisons_connection(),
            };
            conn.release(healthy);
            res
        };
        match budget {
            // a connection dropped mid-exchange by the timeout is closed, not pooled
            Some(t) => tokio::time::timeout(t, fut).await.unwrap_or_else(|_| {
                Err(Error::timeout(format!(
                    "{} to {} timed out after {:?}",
                    cmd.name,
                    node.name(),
                    t
                )))
            }),
            None => fut.await,
        }
    }
}

/// Time allowed for the next attempt: the per-attempt timeout, cut short by
/// the total deadline. `None` inside means unbounded; an outer `None` means
/// the deadline has passed.
/// Attempts allowed for one command: the first try plus retries, when it
/// is safe to repeat.
fn attempt_count(max_retries: u32, idempotent: bool) -> u32 {
    if idempotent {
        max_retries.saturating_add(1)
    } else {
        1
    }
}

fn attempt_budget(
    per_attempt: Option<Duration>,
    deadline: Option<Instant>,
) -> Option<Option<Duration>> {
    let Some(deadline) = deadline else {
        return Some(per_attempt);
    };
    let left = deadline.checked_duration_since(Instant::now())?;
    if left.is_zero() {
        return None;
    }
    Some(Some(per_attempt.map_or(left, |t| t.min(left))))
}

async fn exchange(conn: &mut Connection, request: &[u8], reply: Reply) -> Result<Vec<Response>> {
    conn.send(request).await?;
    let mut out = Vec::new();
    loop {
        let frame = conn.read_frame().await?;
        if frame.kind != ProtoType::Message {
            return Err(Error::protocol(format!(
                "expected message frame, got {:?}",
                frame.kind
            )));
        }
        match reply {
            Reply::Single => {
                out.push(decode_response(&frame.payload)?);
                return Ok(out);
            }
            Reply::UntilLast => {
                let batch = decode_stream(&frame.payload)?;
                let done = batch.iter().any(|r| r.last);
                out.extend(batch);
                if done {
                    return Ok(out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_count() {
        assert_eq!(attempt_count(2, true), 3);
        assert_eq!(attempt_count(2, false), 1);
        assert_eq!(attempt_count(u32::MAX, true), u32::MAX);
    }

    #[test]
    fn test_budget_without_deadline_is_per_attempt() {
        let t = Some(Duration::from_millis(100));
        assert_eq!(attempt_budget(t, None), Some(t));
        assert_eq!(attempt_budget(None, None), Some(None));
    }

    #[test]
    fn test_budget_is_cut_by_deadline() {
        let deadline = Instant::now() + Duration::from_millis(50);
        let budget = attempt_budget(Some(Duration::from_secs(10)), Some(deadline))
            .unwrap()
            .unwrap();
        assert!(budget <= Duration::from_millis(50));
    }

    #[test]
    fn test_budget_after_deadline_is_none() {
        let deadline = Instant::now() - Duration::from_millis(1);
        assert_eq!(attempt_budget(Some(Duration::from_secs(1)), Some(deadline)), None);
    }
}
