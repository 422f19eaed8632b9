//! Protocol size limits
//!
//! Requests that exceed these limits are rejected with a `Parameter` error
//! before anything is written to a socket.

use crate::error::{Error, Result};

/// Maximum bin name length in bytes
pub const MAX_BIN_NAME_LEN: usize = 15;

/// Maximum namespace name length in bytes
pub const MAX_NAMESPACE_LEN: usize = 31;

/// Maximum set name length in bytes
pub const MAX_SET_LEN: usize = 63;

/// Maximum secondary index name length in bytes
pub const MAX_INDEX_NAME_LEN: usize = 255;

/// Number of partitions per namespace
pub const PARTITIONS: usize = 4096;

/// Size of a key digest in bytes
pub const DIGEST_SIZE: usize = 20;

/// Validate a bin name.
#[track_caller]
pub fn check_bin_name(name: &str) -> Result<()> {
    if name.len() > MAX_BIN_NAME_LEN {
        return Err(Error::parameter(format!(
            "bin name '{}' is {} bytes, limit is {}",
            name,
            name.len(),
            MAX_BIN_NAME_LEN
        )));
    }
    Ok(())
}

/// Validate a namespace name.
#[track_caller]
pub fn check_namespace(ns: &str) -> Result<()> {
    if ns.is_empty() {
        return Err(Error::parameter("namespace must not be empty"));
    }
    if ns.len() > MAX_NAMESPACE_LEN {
        return Err(Error::parameter(format!(
            "namespace '{}' exceeds {} bytes",
            ns, MAX_NAMESPACE_LEN
        )));
    }
    Ok(())
}

/// Validate a set name.
#[track_caller]
pub fn check_set(set: &str) -> Result<()> {
    if set.len() > MAX_SET_LEN {
        return Err(Error::parameter(format!(
            "set '{}' exceeds {} bytes",
            set, MAX_SET_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_name_limit() {
        assert!(check_bin_name("fifteen_chars__").is_ok());
        assert!(check_bin_name("sixteen_chars___").is_err());
    }

    #[test]
    fn test_namespace_limits() {
        assert!(check_namespace("test").is_ok());
        assert!(check_namespace("").is_err());
        assert!(check_namespace(&"n".repeat(32)).is_err());
    }

    #[test]
    fn test_set_limit() {
        assert!(check_set("").is_ok());
        assert!(check_set(&"s".repeat(63)).is_ok());
        assert!(check_set(&"s".repeat(64)).is_err());
    }
}
