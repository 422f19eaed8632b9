//! Records and record metadata

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::key::Key;
use crate::value::Value;

/// Bins of a record, ordered by name.
pub type Bins = BTreeMap<String, Value>;

/// TTL sentinel: use the namespace default expiration.
pub const TTL_NAMESPACE_DEFAULT: i32 = 0;

/// TTL sentinel: the record never expires.
pub const TTL_NEVER_EXPIRE: i32 = -1;

/// TTL sentinel: keep the record's current expiration.
pub const TTL_DONT_UPDATE: i32 = -2;

/// Per-record metadata returned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Metadata {
    /// Write counter, starts at 1 on create
    pub generation: u32,
    /// Seconds until expiration, or one of the `TTL_*` sentinels
    pub ttl: i32,
    /// Last update time in milliseconds since the Unix epoch
    pub last_update_time: u64,
}

/// Which bins a read returns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BinSelection {
    /// Every bin
    #[default]
    All,
    /// Only the named bins
    Named(Vec<String>),
    /// Metadata only
    Header,
}

impl BinSelection {
    /// Select the given bin names.
    pub fn named<S: AsRef<str>>(names: &[S]) -> Self {
        BinSelection::Named(names.iter().map(|s| s.as_ref().to_string()).collect())
    }
}

/// A record: key, bins and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Record key
    pub key: Key,
    /// Bin values
    pub bins: Bins,
    /// Metadata
    pub metadata: Metadata,
}

impl Record {
    /// Build a record.
    pub fn new(key: Key, bins: Bins, metadata: Metadata) -> Self {
        Record {
            key,
            bins,
            metadata,
        }
    }

    /// Value of the named bin.
    pub fn bin(&self, name: &str) -> Option<&Value> {
        self.bins.get(name)
    }

    /// Write generation.
    pub fn generation(&self) -> u32 {
        self.metadata.generation
    }
}

/// Build a [`Bins`] map from `name => value` pairs.
///
/// ```
/// use aerie_core::bins;
/// let b = bins! { "a" => 1, "b" => "x" };
/// assert_eq!(b.len(), 2);
/// ```
#[macro_export]
macro_rules! bins {
    () => { $crate::Bins::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::Bins::new();
        $( map.insert(::std::string::String::from($name), $crate::Value::from($value)); )+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bins_macro() {
        let b = crate::bins! { "a" => 1, "b" => "x" };
        assert_eq!(b.get("a"), Some(&Value::Int(1)));
        assert_eq!(b.get("b"), Some(&Value::String("x".into())));
    }

    #[test]
    fn test_record_accessors() {
        let key = Key::new("test", "demo", 1).unwrap();
        let rec = Record::new(
            key,
            crate::bins! { "a" => 1 },
            Metadata {
                generation: 2,
                ttl: TTL_NEVER_EXPIRE,
                last_update_time: 0,
            },
        );
        assert_eq!(rec.generation(), 2);
        assert_eq!(rec.bin("a"), Some(&Value::Int(1)));
        assert_eq!(rec.bin("z"), None);
    }
}
