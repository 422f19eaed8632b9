//! In-memory record storage shared by every mock node

use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;

use aerie_core::{
    Bins, Digest, Filter, IndexDataType, IndexType, Predicate, ResultCode, UserKey, Value,
};

/// A stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Set name
    pub set: String,
    /// User key, when the writer sent it
    pub user_key: Option<UserKey>,
    /// Bins
    pub bins: Bins,
    /// Write counter
    pub generation: u32,
    /// Expiration in seconds since 2010-01-01, 0 for never
    pub void_time: u32,
    /// Last update time, milliseconds since the Unix epoch
    pub last_update_ms: u64,
}

/// A secondary index definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    /// Namespace
    pub namespace: String,
    /// Set, if the index is limited to one
    pub set: Option<String>,
    /// Index name
    pub name: String,
    /// Indexed bin
    pub bin: String,
    /// Indexed part of the bin
    pub index_type: IndexType,
    /// Indexed value type
    pub data_type: IndexDataType,
}

/// Records and indexes of the mock cluster.
#[derive(Debug, Default)]
pub struct Store {
    records: DashMap<(String, Digest), StoredRecord>,
    indexes: DashMap<(String, String), IndexDef>,
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Store {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of a record.
    pub fn get(&self, namespace: &str, digest: &Digest) -> Option<StoredRecord> {
        self.records
            .get(&(namespace.to_string(), *digest))
            .map(|r| r.clone())
    }

    /// Insert or replace a record.
    pub fn put(&self, namespace: &str, digest: Digest, record: StoredRecord) {
        self.records.insert((namespace.to_string(), digest), record);
    }

    /// Remove a record, returning it.
    pub fn remove(&self, namespace: &str, digest: &Digest) -> Option<StoredRecord> {
        self.records
            .remove(&(namespace.to_string(), *digest))
            .map(|(_, r)| r)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of the records of a namespace (and set), sorted by digest.
    pub fn records(&self, namespace: &str, set: Option<&str>) -> Vec<(Digest, StoredRecord)> {
        let mut out: Vec<(Digest, StoredRecord)> = self
            .records
            .iter()
            .filter(|e| e.key().0 == namespace)
            .filter(|e| set.map_or(true, |s| e.value().set == s))
            .map(|e| (e.key().1, e.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Create an index. Fails with `IndexFound` when the name is taken.
    pub fn create_index(&self, def: IndexDef) -> Result<(), ResultCode> {
        let key = (def.namespace.clone(), def.name.clone());
        if self.indexes.contains_key(&key) {
            return Err(ResultCode::IndexFound);
        }
        self.indexes.insert(key, def);
        Ok(())
    }

    /// Drop an index. Fails with `IndexNotFound` when absent.
    pub fn drop_index(&self, namespace: &str, name: &str) -> Result<(), ResultCode> {
        self.indexes
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or(ResultCode::IndexNotFound)
    }

    /// Index by name.
    pub fn index(&self, namespace: &str, name: &str) -> Option<IndexDef> {
        self.indexes
            .get(&(namespace.to_string(), name.to_string()))
            .map(|d| d.clone())
    }

    /// Indexes of a namespace, sorted by name.
    pub fn indexes(&self, namespace: &str) -> Vec<IndexDef> {
        let mut out: Vec<IndexDef> = self
            .indexes
            .iter()
            .filter(|e| e.key().0 == namespace)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Index serving a filter: by name when given, otherwise by bin and type.
    pub fn find_index(
        &self,
        namespace: &str,
        index_name: Option<&str>,
        filter: &Filter,
    ) -> Option<IndexDef> {
        if let Some(name) = index_name {
            return self.index(namespace, name);
        }
        self.indexes(namespace)
            .into_iter()
            .find(|d| d.bin == filter.bin && d.index_type == filter.index_type)
    }
}

/// Values an index sees in a bin.
fn indexed_values<'a>(value: &'a Value, index_type: IndexType) -> Vec<&'a Value> {
    match (index_type, value) {
        (IndexType::Default, v) => vec![v],
        (IndexType::List, Value::List(items)) => items.iter().collect(),
        (IndexType::MapKeys, Value::Map(m)) => m.entries.iter().map(|(k, _)| k).collect(),
        (IndexType::MapValues, Value::Map(m)) => m.entries.iter().map(|(_, v)| v).collect(),
        _ => Vec::new(),
    }
}

fn type_matches(value: &Value, data_type: IndexDataType) -> bool {
    matches!(
        (data_type, value),
        (IndexDataType::Numeric, Value::Int(_))
            | (IndexDataType::String, Value::String(_))
            | (IndexDataType::Geo2dSphere, Value::GeoJson(_))
    )
}

/// True when a record satisfies a query filter through `index`.
///
/// Geo predicates match every GeoJSON value: the mock does no geometry.
pub fn filter_matches(index: &IndexDef, filter: &Filter, bins: &Bins) -> bool {
    let Some(value) = bins.get(&filter.bin) else {
        return false;
    };
    indexed_values(value, index.index_type)
        .into_iter()
        .filter(|v| type_matches(v, index.data_type))
        .any(|v| match (&filter.predicate, v) {
            (Predicate::Equal(expected), v) => expected == v,
            (Predicate::Range { begin, end }, Value::Int(i)) => begin <= i && i <= end,
            (Predicate::GeoWithin(_) | Predicate::GeoContains(_), Value::GeoJson(_)) => true,
            _ => false,
        })
}
