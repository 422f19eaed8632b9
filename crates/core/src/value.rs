//! Value types for bins, list elements and map entries
//!
//! The `Value` enum is closed: every variant maps to exactly one particle
//! type on the wire, except `Bool`, which exists so that conversions from
//! dynamic input (JSON) are lossless. `Bool` is rejected when a request is
//! encoded.
//!
//! ## Equality
//!
//! - Different variants are never equal: `Int(1) != Float(1.0)`
//! - `Bytes` are not `String`
//! - Floats use IEEE-754 equality: `NaN != NaN`, `-0.0 == 0.0`
//! - Maps compare entries in order, along with their order flag

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Particle type tag used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ParticleType {
    /// No value / bin delete
    Null = 0,
    /// 64-bit signed integer
    Integer = 1,
    /// 64-bit IEEE-754 float
    Float = 2,
    /// UTF-8 string
    String = 3,
    /// Opaque bytes
    Blob = 4,
    /// Map of scalar keys to values
    Map = 19,
    /// Ordered list of values
    List = 20,
    /// GeoJSON document
    GeoJson = 23,
}

impl ParticleType {
    /// Decode a particle tag byte.
    pub fn from_u8(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => ParticleType::Null,
            1 => ParticleType::Integer,
            2 => ParticleType::Float,
            3 => ParticleType::String,
            4 => ParticleType::Blob,
            19 => ParticleType::Map,
            20 => ParticleType::List,
            23 => ParticleType::GeoJson,
            _ => return None,
        })
    }
}

/// Ordering flag carried by a map value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MapOrder {
    /// Insertion order, no sorting on the server
    #[default]
    Unordered,
    /// Entries sorted by key
    KeyOrdered,
    /// Entries sorted by key, with a value index
    KeyValueOrdered,
}

impl MapOrder {
    /// Wire flag for this order.
    pub fn flag(self) -> u8 {
        match self {
            MapOrder::Unordered => 0,
            MapOrder::KeyOrdered => 1,
            MapOrder::KeyValueOrdered => 3,
        }
    }

    /// Parse a wire flag.
    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(MapOrder::Unordered),
            1 => Some(MapOrder::KeyOrdered),
            3 => Some(MapOrder::KeyValueOrdered),
            _ => None,
        }
    }
}

/// Map value: ordered entries plus an order flag.
///
/// Keys are restricted to scalar variants (`Int`, `Float`, `String`,
/// `Bytes`); anything else is rejected at encode time.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MapValue {
    /// Ordering flag
    pub order: MapOrder,
    /// Entries in wire order
    pub entries: Vec<(Value, Value)>,
}

impl MapValue {
    /// Empty unordered map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty map with the given order.
    pub fn with_order(order: MapOrder) -> Self {
        MapValue {
            order,
            entries: Vec::new(),
        }
    }

    /// Look up the value for `key`.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Insert or replace `key`, returning the previous value.
    ///
    /// Key-ordered maps keep their entries sorted.
    pub fn insert(&mut self, key: Value, value: Value) -> Option<Value> {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.entries.push((key, value));
        if self.order != MapOrder::Unordered {
            self.sort_by_key();
        }
        None
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sort entries by key using [`Value::cmp_scalar`].
    pub fn sort_by_key(&mut self) {
        self.entries.sort_by(|(a, _), (b, _)| a.cmp_scalar(b));
    }
}

/// Value stored in a bin, list element or map entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// No value; writing it deletes the bin
    Null,
    /// Boolean; only for lossless conversion from dynamic input
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// List of values
    List(Vec<Value>),
    /// Map with scalar keys
    Map(MapValue),
    /// GeoJSON document, passed through unparsed
    GeoJson(String),
}

// IEEE-754 float semantics; different variants never compare equal
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::GeoJson(a), Value::GeoJson(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::GeoJson(_) => "GeoJson",
        }
    }

    /// Particle tag used on the wire, or `None` for `Bool`.
    pub fn particle_type(&self) -> Option<ParticleType> {
        Some(match self {
            Value::Null => ParticleType::Null,
            Value::Bool(_) => return None,
            Value::Int(_) => ParticleType::Integer,
            Value::Float(_) => ParticleType::Float,
            Value::String(_) => ParticleType::String,
            Value::Bytes(_) => ParticleType::Blob,
            Value::List(_) => ParticleType::List,
            Value::Map(_) => ParticleType::Map,
            Value::GeoJson(_) => ParticleType::GeoJson,
        })
    }

    /// True for variants allowed as map keys.
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Value::Int(_) | Value::Float(_) | Value::String(_) | Value::Bytes(_)
        )
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as i64 if this is an Int value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if this is a Float value
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as &str if this is a String or GeoJson value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::GeoJson(s) => Some(s),
            _ => None,
        }
    }

    /// Get as &[u8] if this is a Bytes value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get as &[Value] if this is a List value
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Get as &MapValue if this is a Map value
    pub fn as_map(&self) -> Option<&MapValue> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Total order used for key-ordered maps and rank lookups.
    ///
    /// Variants order by particle tag first, then by payload. Floats use
    /// `total_cmp`, so `NaN` sorts after every other float.
    pub fn cmp_scalar(&self, other: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        let rank = |v: &Value| v.particle_type().map(|p| p as u8).unwrap_or(u8::MAX);
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::GeoJson(a), Value::GeoJson(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.cmp_scalar(y) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Map(a), Value::Map(b)) => a.len().cmp(&b.len()),
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", serde_json::Value::from(self.clone()))
    }
}

// ============================================================================
// From implementations for ergonomic API usage
// ============================================================================

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<MapValue> for Value {
    fn from(m: MapValue) -> Self {
        Value::Map(m)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(MapValue {
            order: MapOrder::Unordered,
            entries: m.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
        })
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ============================================================================
// serde_json interop for the CLI and dynamic callers
// ============================================================================

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    // u64 beyond i64::MAX
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => Value::List(arr.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(obj) => Value::Map(MapValue {
                order: MapOrder::Unordered,
                entries: obj
                    .into_iter()
                    .map(|(k, v)| (Value::String(k), Value::from(v)))
                    .collect(),
            }),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        use base64::Engine;
        match v {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Bytes(b) => serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(b),
            ),
            Value::List(l) => {
                serde_json::Value::Array(l.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Map(m) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in m.entries {
                    let key = match k {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    obj.insert(key, serde_json::Value::from(v));
                }
                serde_json::Value::Object(obj)
            }
            Value::GeoJson(s) => serde_json::from_str(&s).unwrap_or(serde_json::Value::String(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_different_variants_never_equal() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::String("a".into()), Value::Bytes(b"a".to_vec()));
        assert_ne!(
            Value::String("{}".into()),
            Value::GeoJson("{}".into())
        );
    }

    #[test]
    fn test_float_ieee_equality() {
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
    }

    #[test]
    fn test_particle_types() {
        assert_eq!(Value::Int(3).particle_type(), Some(ParticleType::Integer));
        assert_eq!(Value::Bool(true).particle_type(), None);
        assert_eq!(
            Value::GeoJson("{}".into()).particle_type(),
            Some(ParticleType::GeoJson)
        );
        assert_eq!(ParticleType::from_u8(20), Some(ParticleType::List));
        assert_eq!(ParticleType::from_u8(5), None);
    }

    #[test]
    fn test_map_order_flags() {
        for order in [MapOrder::Unordered, MapOrder::KeyOrdered, MapOrder::KeyValueOrdered] {
            assert_eq!(MapOrder::from_flag(order.flag()), Some(order));
        }
        assert_eq!(MapOrder::from_flag(2), None);
    }

    #[test]
    fn test_key_ordered_map_insert_sorts() {
        let mut m = MapValue::with_order(MapOrder::KeyOrdered);
        m.insert(Value::from("b"), Value::Int(2));
        m.insert(Value::from("a"), Value::Int(1));
        let keys: Vec<_> = m.entries.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![Value::from("a"), Value::from("b")]);

        assert_eq!(m.insert(Value::from("a"), Value::Int(9)), Some(Value::Int(1)));
        assert_eq!(m.get(&Value::from("a")), Some(&Value::Int(9)));
        assert_eq!(m.remove(&Value::from("b")), Some(Value::Int(2)));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"a": 1, "b": "x", "c": [1.5, null, true]});
        let v = Value::from(json.clone());
        let map = v.as_map().unwrap();
        assert_eq!(map.get(&Value::from("a")), Some(&Value::Int(1)));
        assert_eq!(
            map.get(&Value::from("c")),
            Some(&Value::List(vec![Value::Float(1.5), Value::Null, Value::Bool(true)]))
        );
        assert_eq!(serde_json::Value::from(v), json);
    }

    #[test]
    fn test_bytes_to_json_is_base64() {
        let json = serde_json::Value::from(Value::Bytes(vec![1, 2, 3]));
        assert_eq!(json, serde_json::Value::String("AQID".into()));
    }

    #[test]
    fn test_cmp_scalar_orders_by_tag_then_payload() {
        use std::cmp::Ordering;
        assert_eq!(Value::Int(5).cmp_scalar(&Value::Int(7)), Ordering::Less);
        assert_eq!(Value::Int(99).cmp_scalar(&Value::from("a")), Ordering::Less);
        assert_eq!(Value::from("b").cmp_scalar(&Value::from("a")), Ordering::Greater);
    }
}
