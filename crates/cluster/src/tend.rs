//! Cluster tending
//!
//! One cycle:
//! 1. Ask every known node (the seeds on the first cycle) for its name,
//!    partition generation, peers and partition ownership.
//! 2. Probe peers advertised by any node that are not yet known.
//! 3. Deactivate nodes that failed `max_tend_failures` cycles in a row and
//!    drop inactive nodes no peer advertises anymore.
//! 4. Build a new partition table and swap it in with the node set.
//!
//! A cycle in which every known node fails leaves the previous snapshot in
//! place.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aerie_core::{Error, Result};

use crate::cluster::{Cluster, ClusterConfig, ClusterSnapshot};
use crate::connection::Connection;
use crate::host::Host;
use crate::node::Node;
use crate::partition::{PartitionTable, ReplicaMap};

/// Info command: node id.
pub const INFO_NODE: &str = "node";
/// Info command: partition generation.
pub const INFO_PARTITION_GENERATION: &str = "partition-generation";
/// Info command: peer services.
pub const INFO_SERVICES: &str = "services";
/// Info command: partition ownership.
pub const INFO_REPLICAS: &str = "replicas";
/// Info command: cluster name.
pub const INFO_CLUSTER_NAME: &str = "cluster-name";

/// Outcome of one tend cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TendReport {
    /// Known nodes that answered
    pub refreshed: usize,
    /// Known nodes that failed
    pub failed: usize,
    /// Nodes discovered this cycle
    pub added: Vec<String>,
    /// Nodes dropped this cycle
    pub removed: Vec<String>,
    /// False when the cycle left the previous snapshot in place
    pub swapped: bool,
}

fn tend_commands(config: &ClusterConfig) -> Vec<&'static str> {
    let mut cmds = vec![
        INFO_NODE,
        INFO_PARTITION_GENERATION,
        INFO_SERVICES,
        INFO_REPLICAS,
    ];
    if config.cluster_name.is_some() {
        cmds.push(INFO_CLUSTER_NAME);
    }
    cmds
}

fn field<'a>(info: &'a BTreeMap<String, String>, name: &str) -> Result<&'a str> {
    info.get(name)
        .map(String::as_str)
        .ok_or_else(|| Error::protocol(format!("info response missing {}", name)))
}

fn check_cluster_name(config: &ClusterConfig, info: &BTreeMap<String, String>) -> Result<()> {
    if let Some(expected) = &config.cluster_name {
        let actual = field(info, INFO_CLUSTER_NAME)?;
        if actual != expected {
            return Err(Error::invalid_node(format!(
                "cluster name {} does not match expected {}",
                actual, expected
            )));
        }
    }
    Ok(())
}

/// Parse a `services` value: `host:port;host:port`.
pub fn parse_services(value: &str) -> Result<Vec<Host>> {
    value
        .split(';')
        .filter(|s| !s.trim().is_empty())
        .map(|s| Host::parse(s, crate::host::DEFAULT_PORT))
        .collect()
}

/// Apply a node's info response: generation, ownership and peers.
fn apply_info(node: &Node, config: &ClusterConfig, info: &BTreeMap<String, String>) -> Result<()> {
    let name = field(info, INFO_NODE)?;
    if name != node.name() {
        return Err(Error::invalid_node(format!(
            "node at {} now reports name {} instead of {}",
            node.addr(),
            name,
            node.name()
        )));
    }
    check_cluster_name(config, info)?;
    let generation: i64 = field(info, INFO_PARTITION_GENERATION)?
        .trim()
        .parse()
        .map_err(|_| Error::protocol("invalid partition-generation"))?;
    let replicas = ReplicaMap::parse(field(info, INFO_REPLICAS)?)?;
    let peers = parse_services(field(info, INFO_SERVICES)?)?;
    node.set_partition_generation(generation);
    node.set_replicas(replicas);
    node.set_peers(peers);
    Ok(())
}

async fn refresh(node: Arc<Node>, config: Arc<ClusterConfig>) -> (Arc<Node>, Result<()>) {
    let cmds = tend_commands(&config);
    let res = match node.tend_info(&cmds, config.conn_timeout).await {
        Ok(info) => apply_info(&node, &config, &info),
        Err(e) => Err(e),
    };
    (node, res)
}

/// Connect to an unknown address, learn its name and build a node.
async fn probe(host: Host, addr: SocketAddr, config: Arc<ClusterConfig>) -> Result<Arc<Node>> {
    let fut = async {
        let mut conn = Connection::connect(addr, config.conn_timeout).await?;
        if let Some(creds) = &config.credentials {
            conn.login(creds).await?;
        }
        let info = conn.info(&tend_commands(&config)).await?;
        Ok::<_, Error>((conn, info))
    };
    let (conn, info) = tokio::time::timeout(config.conn_timeout, fut)
        .await
        .map_err(|_| Error::timeout(format!("probe of {} timed out", addr)))??;
    let name = field(&info, INFO_NODE)?.to_string();
    let node = Node::new(name, host, addr, config.pool_config());
    apply_info(&node, &config, &info)?;
    node.adopt_tend_connection(conn).await;
    Ok(node)
}

impl Cluster {
    /// Run one tend cycle now.
    ///
    /// Cycles never overlap; a call made while another cycle runs waits for
    /// it and then runs its own.
    pub async fn tend(&self) -> TendReport {
        let _guard = self.tend_lock.lock().await;
        let config = Arc::new(self.config.clone());
        let current = self.snapshot();
        let mut report = TendReport::default();

        let mut set = JoinSet::new();
        for node in current.nodes.iter() {
            set.spawn(refresh(Arc::clone(node), Arc::clone(&config)));
        }
        while let Some(joined) = set.join_next().await {
            let Ok((node, res)) = joined else { continue };
            match res {
                Ok(()) => {
                    if !node.is_active() {
                        info!(target: "aerie::tend", node = %node.name(), "Node reactivated");
                    }
                    node.tend_succeeded();
                    report.refreshed += 1;
                }
                Err(e) => {
                    report.failed += 1;
                    if node.tend_failed(config.max_tend_failures) {
                        warn!(
                            target: "aerie::tend",
                            node = %node.name(),
                            failures = node.failures(),
                            "Node deactivated"
                        );
                    } else {
                        debug!(target: "aerie::tend", node = %node.name(), error = %e, "Node refresh failed");
                    }
                }
            }
            node.pool().reap_idle();
        }

        let mut nodes: Vec<Arc<Node>> = current.nodes.clone();

        // candidates: peers of active nodes, or the seeds when none is active
        let mut candidates: BTreeSet<Host> = BTreeSet::new();
        for n in nodes.iter().filter(|n| n.is_active()) {
            candidates.extend(n.peers());
        }
        if !nodes.iter().any(|n| n.is_active()) {
            candidates.extend(config.seeds.iter().cloned());
        }

        let mut probes = JoinSet::new();
        for host in candidates {
            let addrs = match host.resolve().await {
                Ok(a) => a,
                Err(e) => {
                    debug!(target: "aerie::tend", %host, error = %e, "Cannot resolve host");
                    continue;
                }
            };
            for addr in addrs {
                if nodes.iter().any(|n| n.addr() == addr) {
                    continue;
                }
                probes.spawn(probe(host.clone(), addr, Arc::clone(&config)));
            }
        }
        while let Some(joined) = probes.join_next().await {
            let Ok(res) = joined else { continue };
            match res {
                Ok(node) => {
                    if nodes.iter().any(|n| n.name() == node.name()) {
                        node.close();
                        continue;
                    }
                    info!(target: "aerie::tend", node = %node.name(), addr = %node.addr(), "Node added");
                    report.added.push(node.name().to_string());
                    nodes.push(node);
                }
                Err(e) => {
                    debug!(target: "aerie::tend", error = %e, "Probe failed");
                }
            }
        }

        if report.refreshed == 0 && report.added.is_empty() && !current.nodes.is_empty() {
            warn!(target: "aerie::tend", failed = report.failed, "No node answered, keeping previous partition table");
            return report;
        }

        let advertised: BTreeSet<SocketAddr> = {
            let mut hosts = BTreeSet::new();
            for n in nodes.iter().filter(|n| n.is_active()) {
                hosts.extend(n.peers());
            }
            let mut addrs = BTreeSet::new();
            for h in hosts {
                if let Ok(a) = h.resolve().await {
                    addrs.extend(a);
                }
            }
            addrs
        };
        nodes.retain(|n| {
            if n.is_active() || advertised.contains(&n.addr()) {
                return true;
            }
            info!(target: "aerie::tend", node = %n.name(), "Node removed");
            report.removed.push(n.name().to_string());
            n.close();
            false
        });
        nodes.sort_by(|a, b| a.name().cmp(b.name()));

        let table = PartitionTable::build(&nodes);
        self.state.store(Arc::new(ClusterSnapshot {
            nodes,
            table,
            version: current.version + 1,
        }));
        report.swapped = true;
        debug!(
            target: "aerie::tend",
            refreshed = report.refreshed,
            failed = report.failed,
            added = report.added.len(),
            removed = report.removed.len(),
            "Tend cycle complete"
        );
        report
    }
}

/// Tend every `tend_interval` until cancelled or the cluster is dropped.
pub(crate) fn spawn_tend_loop(cluster: &Arc<Cluster>, cancel: CancellationToken) -> JoinHandle<()> {
    let weak: Weak<Cluster> = Arc::downgrade(cluster);
    let interval = cluster.config.tend_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(cluster) = weak.upgrade() else { break };
            cluster.tend().await;
        }
        debug!(target: "aerie::tend", "Tend loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_services() {
        let hosts = parse_services("10.0.0.1:3000;10.0.0.2:3001;").unwrap();
        assert_eq!(hosts, vec![Host::new("10.0.0.1", 3000), Host::new("10.0.0.2", 3001)]);
        assert!(parse_services("").unwrap().is_empty());
    }

    #[test]
    fn test_tend_commands_include_cluster_name_when_set() {
        let mut config = ClusterConfig::default();
        assert!(!tend_commands(&config).contains(&INFO_CLUSTER_NAME));
        config.cluster_name = Some("prod".into());
        assert!(tend_commands(&config).contains(&INFO_CLUSTER_NAME));
    }

    #[test]
    fn test_cluster_name_mismatch_rejected() {
        let config = ClusterConfig {
            cluster_name: Some("prod".into()),
            ..Default::default()
        };
        let mut info = BTreeMap::new();
        info.insert(INFO_CLUSTER_NAME.to_string(), "dev".to_string());
        assert!(check_cluster_name(&config, &info).is_err());
        info.insert(INFO_CLUSTER_NAME.to_string(), "prod".to_string());
        assert!(check_cluster_name(&config, &info).is_ok());
    }
}
