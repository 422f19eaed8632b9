//! Map operations
//!
//! Selector operations (`get_by_*`, `remove_by_*`) take a [`MapReturnType`]
//! as their first argument. Interval bounds of `Value::Null` are open: a
//! null `begin` means "from the smallest", a null `end` "to the largest".
//! Writes carry the map's order flag as their last argument so the server
//! can create the bin with the right ordering.

#![allow(missing_docs)]

use super::{OpKind, Operation};
use crate::value::{MapOrder, MapValue, Value};

pub const SET_TYPE: u8 = 64;
pub const ADD: u8 = 65;
pub const ADD_ITEMS: u8 = 66;
pub const PUT: u8 = 67;
pub const PUT_ITEMS: u8 = 68;
pub const REPLACE: u8 = 69;
pub const REPLACE_ITEMS: u8 = 70;
pub const INCREMENT: u8 = 73;
pub const DECREMENT: u8 = 74;
pub const CLEAR: u8 = 75;
pub const REMOVE_BY_KEY: u8 = 76;
pub const REMOVE_BY_INDEX: u8 = 77;
pub const REMOVE_BY_RANK: u8 = 79;
pub const REMOVE_BY_KEY_LIST: u8 = 81;
pub const REMOVE_BY_VALUE: u8 = 82;
pub const REMOVE_BY_VALUE_LIST: u8 = 83;
pub const REMOVE_BY_KEY_INTERVAL: u8 = 84;
pub const REMOVE_BY_INDEX_RANGE: u8 = 85;
pub const REMOVE_BY_VALUE_INTERVAL: u8 = 86;
pub const REMOVE_BY_RANK_RANGE: u8 = 87;
pub const SIZE: u8 = 96;
pub const GET_BY_KEY: u8 = 97;
pub const GET_BY_INDEX: u8 = 98;
pub const GET_BY_RANK: u8 = 100;
pub const GET_BY_VALUE: u8 = 102;
pub const GET_BY_KEY_INTERVAL: u8 = 103;
pub const GET_BY_INDEX_RANGE: u8 = 104;
pub const GET_BY_VALUE_INTERVAL: u8 = 105;
pub const GET_BY_RANK_RANGE: u8 = 106;

/// What a selector operation returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapReturnType {
    /// Nothing
    #[default]
    None,
    /// Key-order index
    Index,
    /// Reverse key-order index
    ReverseIndex,
    /// Value-order rank
    Rank,
    /// Reverse value-order rank
    ReverseRank,
    /// Number of selected entries
    Count,
    /// Keys
    Key,
    /// Values
    Value,
    /// Key/value pairs as a map
    KeyValue,
}

impl MapReturnType {
    /// Wire value.
    pub fn as_i64(self) -> i64 {
        match self {
            MapReturnType::None => 0,
            MapReturnType::Index => 1,
            MapReturnType::ReverseIndex => 2,
            MapReturnType::Rank => 3,
            MapReturnType::ReverseRank => 4,
            MapReturnType::Count => 5,
            MapReturnType::Key => 6,
            MapReturnType::Value => 7,
            MapReturnType::KeyValue => 8,
        }
    }

    /// Parse a wire value.
    pub fn from_i64(v: i64) -> Option<Self> {
        Some(match v {
            0 => MapReturnType::None,
            1 => MapReturnType::Index,
            2 => MapReturnType::ReverseIndex,
            3 => MapReturnType::Rank,
            4 => MapReturnType::ReverseRank,
            5 => MapReturnType::Count,
            6 => MapReturnType::Key,
            7 => MapReturnType::Value,
            8 => MapReturnType::KeyValue,
            _ => return None,
        })
    }
}

/// How map writes treat existing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapWriteMode {
    /// Create or overwrite
    #[default]
    Update,
    /// Overwrite existing keys only
    UpdateOnly,
    /// Create new keys only
    CreateOnly,
}

/// Order and write mode for map writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapPolicy {
    /// Ordering applied when the bin is created
    pub order: MapOrder,
    /// Existing-key behavior
    pub write_mode: MapWriteMode,
}

impl MapPolicy {
    fn item_code(&self) -> u8 {
        match self.write_mode {
            MapWriteMode::Update => PUT,
            MapWriteMode::UpdateOnly => REPLACE,
            MapWriteMode::CreateOnly => ADD,
        }
    }

    fn items_code(&self) -> u8 {
        match self.write_mode {
            MapWriteMode::Update => PUT_ITEMS,
            MapWriteMode::UpdateOnly => REPLACE_ITEMS,
            MapWriteMode::CreateOnly => ADD_ITEMS,
        }
    }

    fn order_arg(&self) -> Value {
        Value::Int(self.order.flag() as i64)
    }
}

fn modify(bin: &str, code: u8, args: Vec<Value>) -> Operation {
    Operation::cdt(OpKind::CdtModify, bin, code, args)
}

fn read(bin: &str, code: u8, args: Vec<Value>) -> Operation {
    Operation::cdt(OpKind::CdtRead, bin, code, args)
}

fn selector(rt: MapReturnType, rest: impl IntoIterator<Item = Value>) -> Vec<Value> {
    std::iter::once(Value::Int(rt.as_i64())).chain(rest).collect()
}

fn range(rt: MapReturnType, index: i64, count: Option<u32>) -> Vec<Value> {
    selector(
        rt,
        std::iter::once(Value::Int(index)).chain(count.map(|c| Value::Int(c as i64))),
    )
}

/// Set the map's ordering.
pub fn set_policy(bin: &str, policy: MapPolicy) -> Operation {
    modify(bin, SET_TYPE, vec![policy.order_arg()])
}

/// Write one entry; returns the map size.
pub fn put(bin: &str, key: impl Into<Value>, value: impl Into<Value>, policy: MapPolicy) -> Operation {
    modify(
        bin,
        policy.item_code(),
        vec![key.into(), value.into(), policy.order_arg()],
    )
}

/// Write several entries; returns the map size.
pub fn put_items(bin: &str, items: MapValue, policy: MapPolicy) -> Operation {
    modify(
        bin,
        policy.items_code(),
        vec![Value::Map(items), policy.order_arg()],
    )
}

/// Add `delta` to the value at `key`; returns the new value.
pub fn increment(bin: &str, key: impl Into<Value>, delta: impl Into<Value>, policy: MapPolicy) -> Operation {
    modify(bin, INCREMENT, vec![key.into(), delta.into(), policy.order_arg()])
}

/// Subtract `delta` from the value at `key`; returns the new value.
pub fn decrement(bin: &str, key: impl Into<Value>, delta: impl Into<Value>, policy: MapPolicy) -> Operation {
    modify(bin, DECREMENT, vec![key.into(), delta.into(), policy.order_arg()])
}

/// Remove all entries.
pub fn clear(bin: &str) -> Operation {
    modify(bin, CLEAR, Vec::new())
}

/// Remove the entry at `key`.
pub fn remove_by_key(bin: &str, key: impl Into<Value>, rt: MapReturnType) -> Operation {
    modify(bin, REMOVE_BY_KEY, selector(rt, [key.into()]))
}

/// Remove the entries at `keys`.
pub fn remove_by_key_list(bin: &str, keys: Vec<Value>, rt: MapReturnType) -> Operation {
    modify(bin, REMOVE_BY_KEY_LIST, selector(rt, [Value::List(keys)]))
}

/// Remove entries with `begin <= key < end`.
pub fn remove_by_key_range(bin: &str, begin: impl Into<Value>, end: impl Into<Value>, rt: MapReturnType) -> Operation {
    modify(bin, REMOVE_BY_KEY_INTERVAL, selector(rt, [begin.into(), end.into()]))
}

/// Remove entries whose value equals `value`.
pub fn remove_by_value(bin: &str, value: impl Into<Value>, rt: MapReturnType) -> Operation {
    modify(bin, REMOVE_BY_VALUE, selector(rt, [value.into()]))
}

/// Remove entries whose value is in `values`.
pub fn remove_by_value_list(bin: &str, values: Vec<Value>, rt: MapReturnType) -> Operation {
    modify(bin, REMOVE_BY_VALUE_LIST, selector(rt, [Value::List(values)]))
}

/// Remove entries with `begin <= value < end`.
pub fn remove_by_value_range(bin: &str, begin: impl Into<Value>, end: impl Into<Value>, rt: MapReturnType) -> Operation {
    modify(bin, REMOVE_BY_VALUE_INTERVAL, selector(rt, [begin.into(), end.into()]))
}

/// Remove the entry at key-order `index`.
pub fn remove_by_index(bin: &str, index: i64, rt: MapReturnType) -> Operation {
    modify(bin, REMOVE_BY_INDEX, selector(rt, [Value::Int(index)]))
}

/// Remove `count` entries starting at key-order `index`.
pub fn remove_by_index_range(bin: &str, index: i64, count: Option<u32>, rt: MapReturnType) -> Operation {
    modify(bin, REMOVE_BY_INDEX_RANGE, range(rt, index, count))
}

/// Remove the entry at value-order `rank`.
pub fn remove_by_rank(bin: &str, rank: i64, rt: MapReturnType) -> Operation {
    modify(bin, REMOVE_BY_RANK, selector(rt, [Value::Int(rank)]))
}

/// Remove `count` entries starting at value-order `rank`.
pub fn remove_by_rank_range(bin: &str, rank: i64, count: Option<u32>, rt: MapReturnType) -> Operation {
    modify(bin, REMOVE_BY_RANK_RANGE, range(rt, rank, count))
}

/// Entry count.
pub fn size(bin: &str) -> Operation {
    read(bin, SIZE, Vec::new())
}

/// Select the entry at `key`.
pub fn get_by_key(bin: &str, key: impl Into<Value>, rt: MapReturnType) -> Operation {
    read(bin, GET_BY_KEY, selector(rt, [key.into()]))
}

/// Select entries with `begin <= key < end`.
pub fn get_by_key_range(bin: &str, begin: impl Into<Value>, end: impl Into<Value>, rt: MapReturnType) -> Operation {
    read(bin, GET_BY_KEY_INTERVAL, selector(rt, [begin.into(), end.into()]))
}

/// Select entries whose value equals `value`.
pub fn get_by_value(bin: &str, value: impl Into<Value>, rt: MapReturnType) -> Operation {
    read(bin, GET_BY_VALUE, selector(rt, [value.into()]))
}

/// Select entries with `begin <= value < end`.
pub fn get_by_value_range(bin: &str, begin: impl Into<Value>, end: impl Into<Value>, rt: MapReturnType) -> Operation {
    read(bin, GET_BY_VALUE_INTERVAL, selector(rt, [begin.into(), end.into()]))
}

/// Select the entry at key-order `index`.
pub fn get_by_index(bin: &str, index: i64, rt: MapReturnType) -> Operation {
    read(bin, GET_BY_INDEX, selector(rt, [Value::Int(index)]))
}

/// Select `count` entries starting at key-order `index`.
pub fn get_by_index_range(bin: &str, index: i64, count: Option<u32>, rt: MapReturnType) -> Operation {
    read(bin, GET_BY_INDEX_RANGE, range(rt, index, count))
}

/// Select the entry at value-order `rank`.
pub fn get_by_rank(bin: &str, rank: i64, rt: MapReturnType) -> Operation {
    read(bin, GET_BY_RANK, selector(rt, [Value::Int(rank)]))
}

/// Select `count` entries starting at value-order `rank`.
pub fn get_by_rank_range(bin: &str, rank: i64, count: Option<u32>, rt: MapReturnType) -> Operation {
    read(bin, GET_BY_RANK_RANGE, range(rt, rank, count))
}
