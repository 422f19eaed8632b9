//! Per-operation policies
//!
//! Policies are plain structs with documented defaults. They deserialize
//! from TOML with every field optional, so a config file only has to name
//! what it overrides:
//!
//! ```toml
//! [policies.read]
//! timeout_ms = 250
//! max_retries = 2
//! replica = "any"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How to proceed when a node's pool is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnAcquire {
    /// Fail immediately with `NoMoreConnections`
    #[default]
    FailFast,
    /// Wait for a release, bounded by the attempt timeout
    Wait,
}

/// Settings shared by every command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BasePolicy {
    /// Per-attempt timeout in milliseconds; 0 disables it
    pub timeout_ms: u64,
    /// Additional attempts after the first one
    pub max_retries: u32,
    /// Deadline across all attempts in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_timeout_ms: Option<u64>,
    /// Pool behavior at capacity
    pub conn_acquire: ConnAcquire,
}

impl Default for BasePolicy {
    fn default() -> Self {
        BasePolicy {
            timeout_ms: 1000,
            max_retries: 1,
            total_timeout_ms: None,
            conn_acquire: ConnAcquire::FailFast,
        }
    }
}

impl BasePolicy {
    /// Per-attempt timeout, or `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    /// Deadline across all attempts, if any.
    pub fn total_timeout(&self) -> Option<Duration> {
        self.total_timeout_ms.map(Duration::from_millis)
    }
}

/// Whether the user key is sent and stored alongside the digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    /// Send only the digest
    #[default]
    Digest,
    /// Send the user key too
    Send,
}

/// Which replica serves a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Replica {
    /// Always the partition master
    #[default]
    Master,
    /// Round-robin over active replicas (reads only)
    Any,
}

/// How many replicas a read consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    /// A single replica
    #[default]
    One,
    /// All replicas, returning the latest
    All,
}

/// When the server acknowledges a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitLevel {
    /// After all replicas commit
    #[default]
    All,
    /// After the master commits
    Master,
}

/// Generation check applied to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPolicy {
    /// No check
    #[default]
    None,
    /// Write only if the stored generation equals the expected one
    ExpectEqual,
    /// Write only if the expected generation is greater than the stored one
    ExpectGreater,
}

/// Behavior when the record does or does not already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordExistsAction {
    /// Create or merge bins into the existing record
    #[default]
    Update,
    /// Merge bins, fail if the record does not exist
    UpdateOnly,
    /// Create or replace all bins
    Replace,
    /// Replace all bins, fail if the record does not exist
    ReplaceOnly,
    /// Create, fail if the record exists
    CreateOnly,
}

/// Scan scheduling priority on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Server decides
    #[default]
    Default,
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
}

impl Priority {
    /// Wire value.
    pub fn as_u8(self) -> u8 {
        match self {
            Priority::Default => 0,
            Priority::Low => 1,
            Priority::Medium => 2,
            Priority::High => 3,
        }
    }
}

/// Policy for single-record reads.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadPolicy {
    /// Shared settings
    #[serde(flatten)]
    pub base: BasePolicy,
    /// Key send mode
    pub key: KeyPolicy,
    /// Replica selection
    pub replica: Replica,
    /// Read consistency
    pub consistency_level: ConsistencyLevel,
}

/// Policy for writes, deletes and multi-op commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WritePolicy {
    /// Shared settings
    #[serde(flatten)]
    pub base: BasePolicy,
    /// Key send mode
    pub key: KeyPolicy,
    /// Existence behavior
    pub exists: RecordExistsAction,
    /// Generation check mode
    pub generation_policy: GenerationPolicy,
    /// Expected generation for the check
    pub generation: u32,
    /// Record TTL in seconds or a `TTL_*` sentinel
    pub ttl: i32,
    /// Commit acknowledgement level
    pub commit_level: CommitLevel,
    /// Leave a tombstone on delete
    pub durable_delete: bool,
    /// Retry on transport failures; only safe for idempotent writes
    pub retry_safe: bool,
}

impl Default for WritePolicy {
    fn default() -> Self {
        WritePolicy {
            base: BasePolicy::default(),
            key: KeyPolicy::Digest,
            exists: RecordExistsAction::Update,
            generation_policy: GenerationPolicy::None,
            generation: 0,
            ttl: crate::record::TTL_NAMESPACE_DEFAULT,
            commit_level: CommitLevel::All,
            durable_delete: false,
            retry_safe: false,
        }
    }
}

impl WritePolicy {
    /// Write policy expecting the given generation.
    pub fn expect_generation(generation: u32) -> Self {
        WritePolicy {
            generation_policy: GenerationPolicy::ExpectEqual,
            generation,
            ..Default::default()
        }
    }
}

/// Policy for batch reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchPolicy {
    /// Shared settings
    #[serde(flatten)]
    pub base: BasePolicy,
    /// Run per-node sub-requests concurrently
    pub concurrent: bool,
    /// Read consistency
    pub consistency_level: ConsistencyLevel,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        BatchPolicy {
            base: BasePolicy::default(),
            concurrent: true,
            consistency_level: ConsistencyLevel::One,
        }
    }
}

/// Policy for scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPolicy {
    /// Shared settings; the timeout bounds each chunk read
    #[serde(flatten)]
    pub base: BasePolicy,
    /// Records buffered between node readers and the consumer
    pub record_queue_size: usize,
    /// Abort the scan if the cluster changes while it runs
    pub fail_on_cluster_change: bool,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        ScanPolicy {
            base: BasePolicy {
                timeout_ms: 10_000,
                max_retries: 0,
                ..BasePolicy::default()
            },
            record_queue_size: 256,
            fail_on_cluster_change: false,
        }
    }
}

/// Policy for secondary-index queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryPolicy {
    /// Shared settings; the timeout bounds each chunk read
    #[serde(flatten)]
    pub base: BasePolicy,
    /// Records buffered between node readers and the consumer
    pub record_queue_size: usize,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        QueryPolicy {
            base: BasePolicy {
                timeout_ms: 10_000,
                max_retries: 0,
                ..BasePolicy::default()
            },
            record_queue_size: 256,
        }
    }
}

/// Policy for info requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfoPolicy {
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for InfoPolicy {
    fn default() -> Self {
        InfoPolicy { timeout_ms: 1000 }
    }
}

impl InfoPolicy {
    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
