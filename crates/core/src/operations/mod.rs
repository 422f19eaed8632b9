//! Operations executed server-side, in order, against one record
//!
//! Single-bin operations (`put`, `add`, `append`, ...) are built by the free
//! functions in this module. Collection operations live in [`lists`] and
//! [`maps`] and travel as a [`CdtOp`]: a one-byte operation code followed
//! by a list of arguments.

pub mod lists;
pub mod maps;

use crate::error::{Error, Result};
use crate::value::Value;

/// Wire operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Read one bin, or all bins when the bin name is empty
    Read,
    /// Read metadata only
    ReadHeader,
    /// Write a bin
    Write,
    /// Collection read
    CdtRead,
    /// Collection modify
    CdtModify,
    /// Integer/float add
    Incr,
    /// String/bytes append
    Append,
    /// String/bytes prepend
    Prepend,
    /// Reset the record's TTL
    Touch,
    /// Delete the record
    Delete,
}

impl OpKind {
    /// Operation code on the wire.
    pub fn code(self) -> u8 {
        match self {
            OpKind::Read | OpKind::ReadHeader => 1,
            OpKind::Write => 2,
            OpKind::CdtRead => 3,
            OpKind::CdtModify => 4,
            OpKind::Incr => 5,
            OpKind::Append => 9,
            OpKind::Prepend => 10,
            OpKind::Touch => 11,
            OpKind::Delete => 14,
        }
    }

    /// Parse an operation code. Code 1 decodes as `Read`.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => OpKind::Read,
            2 => OpKind::Write,
            3 => OpKind::CdtRead,
            4 => OpKind::CdtModify,
            5 => OpKind::Incr,
            9 => OpKind::Append,
            10 => OpKind::Prepend,
            11 => OpKind::Touch,
            14 => OpKind::Delete,
            _ => return None,
        })
    }

    /// True when the operation changes the record.
    pub fn is_write(self) -> bool {
        !matches!(self, OpKind::Read | OpKind::ReadHeader | OpKind::CdtRead)
    }
}

/// Collection operation: code and positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CdtOp {
    /// List or map operation code
    pub code: u8,
    /// Arguments in wire order
    pub args: Vec<Value>,
}

/// Operation payload.
#[derive(Debug, Clone, PartialEq)]
pub enum OpValue {
    /// No payload
    None,
    /// Plain value
    Value(Value),
    /// Collection operation
    Cdt(CdtOp),
}

/// One operation against a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Operation type
    pub kind: OpKind,
    /// Bin name; empty for whole-record operations
    pub bin: String,
    /// Payload
    pub value: OpValue,
}

impl Operation {
    fn new(kind: OpKind, bin: impl Into<String>, value: OpValue) -> Self {
        Operation {
            kind,
            bin: bin.into(),
            value,
        }
    }

    pub(crate) fn cdt(kind: OpKind, bin: &str, code: u8, args: Vec<Value>) -> Self {
        Operation::new(kind, bin, OpValue::Cdt(CdtOp { code, args }))
    }

    /// Reject payloads the server cannot accept for this operation type.
    #[track_caller]
    pub fn validate(&self) -> Result<()> {
        crate::limits::check_bin_name(&self.bin)?;
        match (self.kind, &self.value) {
            (OpKind::Incr, OpValue::Value(Value::Int(_) | Value::Float(_))) => Ok(()),
            (OpKind::Incr, _) => Err(Error::parameter(format!(
                "increment of bin '{}' requires an integer or float",
                self.bin
            ))),
            (
                OpKind::Append | OpKind::Prepend,
                OpValue::Value(Value::String(_) | Value::Bytes(_)),
            ) => Ok(()),
            (OpKind::Append | OpKind::Prepend, _) => Err(Error::parameter(format!(
                "append/prepend on bin '{}' requires a string or bytes",
                self.bin
            ))),
            (OpKind::CdtRead | OpKind::CdtModify, OpValue::Cdt(_)) => Ok(()),
            (OpKind::CdtRead | OpKind::CdtModify, _) => {
                Err(Error::parameter("collection operation without payload"))
            }
            (OpKind::Write, OpValue::Value(_)) => Ok(()),
            (OpKind::Write, _) => Err(Error::parameter("write without a value")),
            _ => Ok(()),
        }
    }
}

/// Read all bins.
pub fn get() -> Operation {
    Operation::new(OpKind::Read, "", OpValue::None)
}

/// Read one bin.
pub fn get_bin(bin: &str) -> Operation {
    Operation::new(OpKind::Read, bin, OpValue::None)
}

/// Read metadata only.
pub fn get_header() -> Operation {
    Operation::new(OpKind::ReadHeader, "", OpValue::None)
}

/// Write a bin. Writing `Value::Null` deletes the bin.
pub fn put(bin: &str, value: impl Into<Value>) -> Operation {
    Operation::new(OpKind::Write, bin, OpValue::Value(value.into()))
}

/// Add to an integer or float bin.
pub fn add(bin: &str, value: impl Into<Value>) -> Operation {
    Operation::new(OpKind::Incr, bin, OpValue::Value(value.into()))
}

/// Append to a string or bytes bin.
pub fn append(bin: &str, value: impl Into<Value>) -> Operation {
    Operation::new(OpKind::Append, bin, OpValue::Value(value.into()))
}

/// Prepend to a string or bytes bin.
pub fn prepend(bin: &str, value: impl Into<Value>) -> Operation {
    Operation::new(OpKind::Prepend, bin, OpValue::Value(value.into()))
}

/// Reset the record's TTL.
pub fn touch() -> Operation {
    Operation::new(OpKind::Touch, "", OpValue::None)
}

/// Delete the record.
pub fn delete() -> Operation {
    Operation::new(OpKind::Delete, "", OpValue::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for kind in [
            OpKind::Read,
            OpKind::Write,
            OpKind::CdtRead,
            OpKind::CdtModify,
            OpKind::Incr,
            OpKind::Append,
            OpKind::Prepend,
            OpKind::Touch,
            OpKind::Delete,
        ] {
            assert_eq!(OpKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(OpKind::ReadHeader.code(), 1);
        assert_eq!(OpKind::from_code(6), None);
    }

    #[test]
    fn test_validate_incr_type() {
        assert!(add("n", 5).validate().is_ok());
        assert!(add("n", 1.5).validate().is_ok());
        assert!(add("n", "x").validate().is_err());
    }

    #[test]
    fn test_validate_append_type() {
        assert!(append("s", "x").validate().is_ok());
        assert!(prepend("s", vec![1u8]).validate().is_ok());
        assert!(append("s", 3).validate().is_err());
    }

    #[test]
    fn test_validate_bin_name() {
        assert!(put("a_very_long_bin_name", 1).validate().is_err());
    }

    #[test]
    fn test_is_write() {
        assert!(!get().kind.is_write());
        assert!(put("a", 1).kind.is_write());
        assert!(touch().kind.is_write());
    }
}
