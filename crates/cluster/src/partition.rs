//! Partition ownership
//!
//! Each node reports the partitions it holds through the `replicas` info
//! command, one bitmap per replica position:
//!
//! ```text
//! ns1:regime,replica_count,bitmap_0,bitmap_1;ns2:...
//! ```
//!
//! A bitmap is 4096 bits (512 bytes) in base64. Bit `p` lives in byte
//! `p >> 3` under mask `0x80 >> (p & 7)`. Position 0 is the master.
//!
//! A [`PartitionTable`] merges every node's map. It is immutable: tending
//! builds a new table each cycle and swaps it in whole.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use aerie_core::limits::PARTITIONS;
use aerie_core::{Error, Result};

use crate::node::Node;

/// Bytes in one partition bitmap.
pub const BITMAP_BYTES: usize = PARTITIONS / 8;

/// Ownership bitmap over all partitions.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap(Box<[u8; BITMAP_BYTES]>);

impl Bitmap {
    /// No partitions.
    pub fn empty() -> Self {
        Bitmap(Box::new([0u8; BITMAP_BYTES]))
    }

    /// Decode a base64 bitmap.
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|e| Error::protocol(format!("invalid partition bitmap: {}", e)))?;
        let arr: [u8; BITMAP_BYTES] = bytes.as_slice().try_into().map_err(|_| {
            Error::protocol(format!(
                "partition bitmap has {} bytes, expected {}",
                bytes.len(),
                BITMAP_BYTES
            ))
        })?;
        Ok(Bitmap(Box::new(arr)))
    }

    /// Encode as base64.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0[..])
    }

    /// True when partition `p` is set.
    pub fn contains(&self, p: usize) -> bool {
        p < PARTITIONS && self.0[p >> 3] & (0x80 >> (p & 7)) != 0
    }

    /// Set partition `p`.
    pub fn insert(&mut self, p: usize) {
        if p < PARTITIONS {
            self.0[p >> 3] |= 0x80 >> (p & 7);
        }
    }

    /// Number of partitions set.
    pub fn count(&self) -> usize {
        self.0.iter().map(|b| b.count_ones() as usize).sum()
    }
}

impl std::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bitmap({} partitions)", self.count())
    }
}

/// One node's partition ownership: namespace to per-replica-position bitmaps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaMap {
    namespaces: BTreeMap<String, Vec<Bitmap>>,
}

impl ReplicaMap {
    /// Parse a `replicas` info value.
    pub fn parse(value: &str) -> Result<Self> {
        let mut namespaces = BTreeMap::new();
        for entry in value.split(';').filter(|e| !e.trim().is_empty()) {
            let (ns, rest) = entry
                .split_once(':')
                .ok_or_else(|| Error::protocol(format!("invalid replicas entry: {}", entry)))?;
            let mut parts = rest.split(',');
            let _regime = parts.next();
            let count: usize = parts
                .next()
                .and_then(|c| c.trim().parse().ok())
                .ok_or_else(|| Error::protocol(format!("invalid replica count in: {}", entry)))?;
            let bitmaps = parts.map(Bitmap::from_base64).collect::<Result<Vec<_>>>()?;
            if bitmaps.len() != count {
                return Err(Error::protocol(format!(
                    "namespace {} declares {} replicas but carries {} bitmaps",
                    ns,
                    count,
                    bitmaps.len()
                )));
            }
            namespaces.insert(ns.trim().to_string(), bitmaps);
        }
        Ok(ReplicaMap { namespaces })
    }

    /// Render as a `replicas` info value.
    pub fn to_info_value(&self) -> String {
        self.namespaces
            .iter()
            .map(|(ns, maps)| {
                let mut s = format!("{}:0,{}", ns, maps.len());
                for m in maps {
                    s.push(',');
                    s.push_str(&m.to_base64());
                }
                s
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Set the bitmaps of one namespace.
    pub fn insert(&mut self, namespace: impl Into<String>, bitmaps: Vec<Bitmap>) {
        self.namespaces.insert(namespace.into(), bitmaps);
    }

    /// Namespaces and their bitmaps.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Bitmap])> {
        self.namespaces.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Owners of one partition.
#[derive(Debug, Clone, Default)]
pub struct Owners {
    /// Master, if any node claims it
    pub master: Option<Arc<Node>>,
    /// Replicas after the master, in node-name order
    pub proles: SmallVec<[Arc<Node>; 2]>,
}

impl Owners {
    /// Master first, then proles.
    pub fn replicas(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.master.iter().chain(self.proles.iter())
    }
}

/// Namespace to partition owners, for all 4096 partitions.
#[derive(Debug, Clone, Default)]
pub struct PartitionTable {
    namespaces: FxHashMap<String, Vec<Owners>>,
}

impl PartitionTable {
    /// Merge the replica maps of the given nodes.
    ///
    /// Inactive nodes and nodes without a map are skipped. When several
    /// nodes claim a master, the highest partition generation wins and ties
    /// go to the smallest node name.
    pub fn build(nodes: &[Arc<Node>]) -> Self {
        let mut sorted: Vec<(&Arc<Node>, Arc<ReplicaMap>)> = nodes
            .iter()
            .filter(|n| n.is_active())
            .filter_map(|n| n.replicas().map(|m| (n, m)))
            .collect();
        sorted.sort_by(|a, b| a.0.name().cmp(b.0.name()));

        let mut namespaces: FxHashMap<String, Vec<Owners>> = FxHashMap::default();
        for (node, map) in &sorted {
            for (ns, bitmaps) in map.iter() {
                let owners = namespaces
                    .entry(ns.to_string())
                    .or_insert_with(|| vec![Owners::default(); PARTITIONS]);
                for (position, bitmap) in bitmaps.iter().enumerate() {
                    for (p, o) in owners.iter_mut().enumerate() {
                        if !bitmap.contains(p) {
                            continue;
                        }
                        if position == 0 {
                            let replace = match &o.master {
                                None => true,
                                // strictly greater: equal generations keep the smaller name
                                Some(cur) => node.partition_generation() > cur.partition_generation(),
                            };
                            if replace {
                                o.master = Some(Arc::clone(node));
                            }
                        } else if !o.proles.iter().any(|n| n.name() == node.name()) {
                            o.proles.push(Arc::clone(node));
                        }
                    }
                }
            }
        }
        for owners in namespaces.values_mut() {
            for o in owners.iter_mut() {
                if let Some(m) = &o.master {
                    let master = m.name().to_string();
                    o.proles.retain(|n| n.name() != master);
                }
            }
        }
        PartitionTable { namespaces }
    }

    /// Owners of a partition.
    pub fn owners(&self, namespace: &str, partition: usize) -> Option<&Owners> {
        self.namespaces.get(namespace)?.get(partition)
    }

    /// Known namespaces.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    /// True when no namespace is known.
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host;
    use crate::pool::PoolConfig;
    use std::net::SocketAddr;

    fn node_with(name: &str, generation: i64, map: ReplicaMap) -> Arc<Node> {
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        let n = Node::new(name, Host::from(addr), addr, PoolConfig::default());
        n.set_partition_generation(generation);
        n.set_replicas(map);
        n
    }

    fn bitmap(parts: &[usize]) -> Bitmap {
        let mut b = Bitmap::empty();
        for p in parts {
            b.insert(*p);
        }
        b
    }

    #[test]
    fn test_bitmap_bit_order() {
        let b = bitmap(&[0, 9]);
        assert_eq!(b.0[0], 0x80);
        assert_eq!(b.0[1], 0x40);
        assert!(b.contains(9));
        assert!(!b.contains(8));
        assert!(!b.contains(PARTITIONS));
    }

    #[test]
    fn test_replica_map_round_trip() {
        let mut m = ReplicaMap::default();
        m.insert("test", vec![bitmap(&[1, 2]), bitmap(&[3])]);
        let parsed = ReplicaMap::parse(&m.to_info_value()).unwrap();
        assert_eq!(parsed, m);
    }

    #[test]
    fn test_replica_map_rejects_bad_input() {
        assert!(ReplicaMap::parse("test").is_err());
        assert!(ReplicaMap::parse("test:0,2,AAAA").is_err());
        assert!(ReplicaMap::parse("test:0,1,!!").is_err());
    }

    #[test]
    fn test_master_conflict_highest_generation_wins() {
        let mut a = ReplicaMap::default();
        a.insert("test", vec![bitmap(&[5])]);
        let mut b = ReplicaMap::default();
        b.insert("test", vec![bitmap(&[5])]);
        let table = PartitionTable::build(&[node_with("A", 1, a), node_with("B", 2, b)]);
        let o = table.owners("test", 5).unwrap();
        assert_eq!(o.master.as_ref().unwrap().name(), "B");
    }

    #[test]
    fn test_master_conflict_tie_smallest_name() {
        let mut a = ReplicaMap::default();
        a.insert("test", vec![bitmap(&[5])]);
        let table = PartitionTable::build(&[
            node_with("C", 3, a.clone()),
            node_with("B", 3, a.clone()),
            node_with("D", 3, a),
        ]);
        assert_eq!(table.owners("test", 5).unwrap().master.as_ref().unwrap().name(), "B");
    }

    #[test]
    fn test_proles_in_name_order_after_master() {
        let mut master = ReplicaMap::default();
        master.insert("test", vec![bitmap(&[7]), Bitmap::empty()]);
        let mut prole = ReplicaMap::default();
        prole.insert("test", vec![Bitmap::empty(), bitmap(&[7])]);
        let table = PartitionTable::build(&[
            node_with("Z", 1, master),
            node_with("M", 1, prole.clone()),
            node_with("B", 1, prole),
        ]);
        let names: Vec<_> = table
            .owners("test", 7)
            .unwrap()
            .replicas()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(names, vec!["Z", "B", "M"]);
    }

    #[test]
    fn test_inactive_nodes_excluded() {
        let mut a = ReplicaMap::default();
        a.insert("test", vec![bitmap(&[1])]);
        let n = node_with("A", 1, a);
        for _ in 0..5 {
            n.tend_failed(5);
        }
        let table = PartitionTable::build(&[n]);
        assert!(table.is_empty());
    }
}
