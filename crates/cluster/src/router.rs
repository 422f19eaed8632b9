//! Key to node routing

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use aerie_core::{Error, Key, Replica, Result};

use crate::node::Node;
use crate::partition::PartitionTable;

/// Picks the node for a key under a replica policy.
///
/// [`Replica::Any`] reads rotate through the active replicas using a single
/// counter shared by every key.
#[derive(Debug, Default)]
pub struct Router {
    sequence: AtomicUsize,
}

impl Router {
    /// New router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `key`. Writes always go to the master.
    pub fn route(
        &self,
        table: &PartitionTable,
        key: &Key,
        replica: Replica,
        is_write: bool,
    ) -> Result<Arc<Node>> {
        let partition = key.partition_id();
        let owners = table.owners(key.namespace(), partition).ok_or_else(|| {
            Error::invalid_node(format!(
                "namespace {} unknown to the cluster",
                key.namespace()
            ))
        })?;

        if is_write || replica == Replica::Master {
            return match &owners.master {
                Some(n) if n.is_active() => Ok(Arc::clone(n)),
                _ => Err(Error::invalid_node(format!(
                    "no active master for {}:{}",
                    key.namespace(),
                    partition
                ))),
            };
        }

        let active: SmallVec<[&Arc<Node>; 4]> =
            owners.replicas().filter(|n| n.is_active()).collect();
        if active.is_empty() {
            return Err(Error::invalid_node(format!(
                "no active replica for {}:{}",
                key.namespace(),
                partition
            )));
        }
        let i = self.sequence.fetch_add(1, Ordering::Relaxed) % active.len();
        Ok(Arc::clone(active[i]))
    }
}
