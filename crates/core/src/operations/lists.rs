//! List operations
//!
//! Indexes may be negative, counting back from the end of the list. Range
//! operations without a count run to the end.

use super::{OpKind, Operation};
use crate::value::Value;

/// Append one item.
pub const APPEND: u8 = 1;
/// Append several items.
pub const APPEND_ITEMS: u8 = 2;
/// Insert one item at an index.
pub const INSERT: u8 = 3;
/// Insert several items at an index.
pub const INSERT_ITEMS: u8 = 4;
/// Remove and return one item.
pub const POP: u8 = 5;
/// Remove and return a range.
pub const POP_RANGE: u8 = 6;
/// Remove one item.
pub const REMOVE: u8 = 7;
/// Remove a range.
pub const REMOVE_RANGE: u8 = 8;
/// Overwrite the item at an index.
pub const SET: u8 = 9;
/// Keep only a range.
pub const TRIM: u8 = 10;
/// Remove all items.
pub const CLEAR: u8 = 11;
/// Item count.
pub const SIZE: u8 = 16;
/// Item at an index.
pub const GET: u8 = 17;
/// Items in a range.
pub const GET_RANGE: u8 = 18;

fn modify(bin: &str, code: u8, args: Vec<Value>) -> Operation {
    Operation::cdt(OpKind::CdtModify, bin, code, args)
}

fn read(bin: &str, code: u8, args: Vec<Value>) -> Operation {
    Operation::cdt(OpKind::CdtRead, bin, code, args)
}

fn range_args(index: i64, count: Option<u32>) -> Vec<Value> {
    let mut args = vec![Value::Int(index)];
    if let Some(count) = count {
        args.push(Value::Int(count as i64));
    }
    args
}

/// Append `value`; returns the new size.
pub fn append(bin: &str, value: impl Into<Value>) -> Operation {
    modify(bin, APPEND, vec![value.into()])
}

/// Append every item; returns the new size.
pub fn append_items(bin: &str, items: Vec<Value>) -> Operation {
    modify(bin, APPEND_ITEMS, vec![Value::List(items)])
}

/// Insert `value` at `index`; returns the new size.
pub fn insert(bin: &str, index: i64, value: impl Into<Value>) -> Operation {
    modify(bin, INSERT, vec![Value::Int(index), value.into()])
}

/// Insert every item at `index`; returns the new size.
pub fn insert_items(bin: &str, index: i64, items: Vec<Value>) -> Operation {
    modify(bin, INSERT_ITEMS, vec![Value::Int(index), Value::List(items)])
}

/// Remove and return the item at `index`.
pub fn pop(bin: &str, index: i64) -> Operation {
    modify(bin, POP, vec![Value::Int(index)])
}

/// Remove and return `count` items starting at `index`.
pub fn pop_range(bin: &str, index: i64, count: Option<u32>) -> Operation {
    modify(bin, POP_RANGE, range_args(index, count))
}

/// Remove the item at `index`; returns the number removed.
pub fn remove(bin: &str, index: i64) -> Operation {
    modify(bin, REMOVE, vec![Value::Int(index)])
}

/// Remove `count` items starting at `index`; returns the number removed.
pub fn remove_range(bin: &str, index: i64, count: Option<u32>) -> Operation {
    modify(bin, REMOVE_RANGE, range_args(index, count))
}

/// Overwrite the item at `index`.
pub fn set(bin: &str, index: i64, value: impl Into<Value>) -> Operation {
    modify(bin, SET, vec![Value::Int(index), value.into()])
}

/// Keep only `count` items starting at `index`; returns the number removed.
pub fn trim(bin: &str, index: i64, count: u32) -> Operation {
    modify(bin, TRIM, vec![Value::Int(index), Value::Int(count as i64)])
}

/// Remove all items.
pub fn clear(bin: &str) -> Operation {
    modify(bin, CLEAR, Vec::new())
}

/// Item count.
pub fn size(bin: &str) -> Operation {
    read(bin, SIZE, Vec::new())
}

/// Item at `index`.
pub fn get(bin: &str, index: i64) -> Operation {
    read(bin, GET, vec![Value::Int(index)])
}

/// `count` items starting at `index`.
pub fn get_range(bin: &str, index: i64, count: Option<u32>) -> Operation {
    read(bin, GET_RANGE, range_args(index, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::OpValue;

    #[test]
    fn test_read_vs_modify() {
        assert_eq!(size("l").kind, OpKind::CdtRead);
        assert_eq!(get_range("l", 0, None).kind, OpKind::CdtRead);
        assert_eq!(append("l", 1).kind, OpKind::CdtModify);
        assert_eq!(trim("l", 0, 2).kind, OpKind::CdtModify);
    }

    #[test]
    fn test_range_args() {
        match get_range("l", -2, Some(5)).value {
            OpValue::Cdt(op) => {
                assert_eq!(op.code, GET_RANGE);
                assert_eq!(op.args, vec![Value::Int(-2), Value::Int(5)]);
            }
            other => panic!("unexpected payload {:?}", other),
        }
        match pop_range("l", 1, None).value {
            OpValue::Cdt(op) => assert_eq!(op.args, vec![Value::Int(1)]),
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
