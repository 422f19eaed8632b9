//! Record keys and digests
//!
//! A key identifies a record within a namespace. The server never sees the
//! user key unless it is explicitly sent; it addresses records by a 20-byte
//! RIPEMD-160 digest over the set name, the user key's particle type and
//! the user key bytes (integers as 8-byte big-endian).
//!
//! ## Invariants
//!
//! - A key's digest is fixed at construction and never changes
//! - Two keys are equal iff their namespaces and digests are equal
//! - The partition id is the first four digest bytes read little-endian,
//!   masked to 12 bits

use std::fmt;
use std::hash::{Hash, Hasher};

use ripemd::{Digest as _, Ripemd160};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::limits::{check_namespace, check_set, DIGEST_SIZE, PARTITIONS};
use crate::value::{ParticleType, Value};

/// 20-byte record digest.
pub type Digest = [u8; DIGEST_SIZE];

/// User-supplied key value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UserKey {
    /// String key
    String(String),
    /// Integer key
    Int(i64),
    /// Bytes key
    Bytes(Vec<u8>),
}

impl UserKey {
    /// Particle type of this key on the wire.
    pub fn particle_type(&self) -> ParticleType {
        match self {
            UserKey::String(_) => ParticleType::String,
            UserKey::Int(_) => ParticleType::Integer,
            UserKey::Bytes(_) => ParticleType::Blob,
        }
    }

    /// Payload bytes as hashed into the digest and sent in the KEY field.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            UserKey::String(s) => s.as_bytes().to_vec(),
            UserKey::Int(i) => i.to_be_bytes().to_vec(),
            UserKey::Bytes(b) => b.clone(),
        }
    }

    /// Convert a value into a user key. Only strings, integers and bytes
    /// are accepted.
    #[track_caller]
    pub fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(UserKey::String(s)),
            Value::Int(i) => Ok(UserKey::Int(i)),
            Value::Bytes(b) => Ok(UserKey::Bytes(b)),
            other => Err(Error::parameter(format!(
                "{} is not a valid key type",
                other.type_name()
            ))),
        }
    }
}

impl From<&str> for UserKey {
    fn from(s: &str) -> Self {
        UserKey::String(s.to_string())
    }
}

impl From<String> for UserKey {
    fn from(s: String) -> Self {
        UserKey::String(s)
    }
}

impl From<i64> for UserKey {
    fn from(i: i64) -> Self {
        UserKey::Int(i)
    }
}

impl From<i32> for UserKey {
    fn from(i: i32) -> Self {
        UserKey::Int(i as i64)
    }
}

impl From<Vec<u8>> for UserKey {
    fn from(b: Vec<u8>) -> Self {
        UserKey::Bytes(b)
    }
}

impl From<UserKey> for Value {
    fn from(k: UserKey) -> Self {
        match k {
            UserKey::String(s) => Value::String(s),
            UserKey::Int(i) => Value::Int(i),
            UserKey::Bytes(b) => Value::Bytes(b),
        }
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserKey::String(s) => write!(f, "{}", s),
            UserKey::Int(i) => write!(f, "{}", i),
            UserKey::Bytes(b) => {
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

/// Compute the digest for a set name and user key.
pub fn compute_digest(set: &str, user_key: &UserKey) -> Digest {
    let mut hasher = Ripemd160::new();
    hasher.update(set.as_bytes());
    hasher.update([user_key.particle_type() as u8]);
    hasher.update(user_key.to_bytes());
    let mut digest = [0u8; DIGEST_SIZE];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

/// Partition id for a digest.
pub fn partition_id(digest: &Digest) -> usize {
    let head = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
    (head as usize) & (PARTITIONS - 1)
}

/// Identifies one record.
#[derive(Debug, Clone)]
pub struct Key {
    namespace: String,
    set: String,
    user_key: Option<UserKey>,
    digest: Digest,
}

impl Key {
    /// Build a key from a user key, computing its digest.
    #[track_caller]
    pub fn new(
        namespace: impl Into<String>,
        set: impl Into<String>,
        user_key: impl Into<UserKey>,
    ) -> Result<Self> {
        let namespace = namespace.into();
        let set = set.into();
        check_namespace(&namespace)?;
        check_set(&set)?;
        let user_key = user_key.into();
        let digest = compute_digest(&set, &user_key);
        Ok(Key {
            namespace,
            set,
            user_key: Some(user_key),
            digest,
        })
    }

    /// Build a key from a precomputed digest.
    #[track_caller]
    pub fn with_digest(
        namespace: impl Into<String>,
        set: impl Into<String>,
        digest: Digest,
    ) -> Result<Self> {
        let namespace = namespace.into();
        let set = set.into();
        check_namespace(&namespace)?;
        check_set(&set)?;
        Ok(Key {
            namespace,
            set,
            user_key: None,
            digest,
        })
    }

    /// Attach the user key to a digest-only key, as returned by the server
    /// when the key was stored. The digest is kept as received.
    pub fn with_user_key(mut self, user_key: UserKey) -> Self {
        self.user_key = Some(user_key);
        self
    }

    /// Namespace name.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Set name (may be empty).
    pub fn set(&self) -> &str {
        &self.set
    }

    /// User key, if known.
    pub fn user_key(&self) -> Option<&UserKey> {
        self.user_key.as_ref()
    }

    /// Record digest.
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// Partition this key lives in.
    pub fn partition_id(&self) -> usize {
        partition_id(&self.digest)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.namespace == other.namespace && self.digest == other.digest
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.namespace.hash(state);
        self.digest.hash(state);
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:", self.namespace, self.set)?;
        match &self.user_key {
            Some(k) => write!(f, "{}", k),
            None => {
                for b in &self.digest {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_equal_inputs_equal_digest() {
        let a = Key::new("test", "demo", "abc").unwrap();
        let b = Key::new("test", "demo", "abc").unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a, b);
    }

    #[test]
    fn test_set_and_type_change_digest() {
        let a = Key::new("test", "demo", "1").unwrap();
        let b = Key::new("test", "other", "1").unwrap();
        let c = Key::new("test", "demo", 1).unwrap();
        assert_ne!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_namespace_participates_in_equality_only() {
        let a = Key::new("ns1", "demo", 7).unwrap();
        let b = Key::new("ns2", "demo", 7).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a, b);
    }

    #[test]
    fn test_with_digest_equals_computed() {
        let a = Key::new("test", "demo", "k").unwrap();
        let b = Key::with_digest("test", "demo", *a.digest()).unwrap();
        assert_eq!(a, b);
        assert!(b.user_key().is_none());
    }

    #[test]
    fn test_partition_id_is_le_masked() {
        let mut digest = [0u8; 20];
        digest[0] = 0xff;
        digest[1] = 0xff;
        digest[2] = 0x12;
        assert_eq!(partition_id(&digest), 0x0fff);
        digest[1] = 0x01;
        assert_eq!(partition_id(&digest), 0x01ff);
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let err = Key::new("", "demo", 1).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Parameter);
        assert!(Key::new("test", "s".repeat(64), 1).is_err());
    }

    #[test]
    fn test_user_key_from_value() {
        assert_eq!(
            UserKey::try_from_value(Value::Int(3)).unwrap(),
            UserKey::Int(3)
        );
        assert!(UserKey::try_from_value(Value::Float(1.0)).is_err());
    }

    proptest! {
        #[test]
        fn prop_digest_deterministic(set in "[a-z]{0,12}", k in any::<i64>()) {
            let a = compute_digest(&set, &UserKey::Int(k));
            let b = compute_digest(&set, &UserKey::Int(k));
            prop_assert_eq!(a, b);
            prop_assert!(partition_id(&a) < PARTITIONS);
        }

        #[test]
        fn prop_distinct_keys_distinct_digests(a in any::<i64>(), b in any::<i64>()) {
            prop_assume!(a != b);
            prop_assert_ne!(
                compute_digest("demo", &UserKey::Int(a)),
                compute_digest("demo", &UserKey::Int(b))
            );
        }
    }
}
