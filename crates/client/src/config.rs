//! Client configuration via TOML
//!
//! Every field has a default, so an empty file is a valid config that talks
//! to `localhost:3000`:
//!
//! ```toml
//! hosts = ["10.0.0.1:3000", "10.0.0.2"]
//! user = "admin"
//! password = "secret"
//! max_conns_per_node = 64
//!
//! [policies.write]
//! timeout_ms = 500
//! retry_safe = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use aerie_cluster::{ClusterConfig, Credentials, Host, DEFAULT_PORT};
use aerie_core::{
    BatchPolicy, Error, InfoPolicy, QueryPolicy, ReadPolicy, Result, ScanPolicy, WritePolicy,
};

/// Environment variable consulted when no hosts are configured.
pub const HOSTS_ENV: &str = "AEROSPIKE_HOSTS";

/// Default policy for each operation family.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientPolicies {
    /// Single-record reads
    pub read: ReadPolicy,
    /// Writes, deletes, operate and UDF calls
    pub write: WritePolicy,
    /// Batch reads
    pub batch: BatchPolicy,
    /// Scans
    pub scan: ScanPolicy,
    /// Secondary-index queries
    pub query: QueryPolicy,
    /// Info requests
    pub info: InfoPolicy,
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Seed hosts as `"name"` or `"name:port"`; empty falls back to
    /// `AEROSPIKE_HOSTS`, then `localhost`
    pub hosts: Vec<String>,
    /// Port for hosts that do not name one
    pub port: u16,
    /// User for authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Password for `user`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Expected cluster name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    /// Connect timeout in milliseconds
    pub conn_timeout_ms: u64,
    /// Tend interval in milliseconds
    pub tend_interval_ms: u64,
    /// Connection cap per node
    pub max_conns_per_node: usize,
    /// Failed tend cycles before a node is dropped
    pub max_tend_failures: u32,
    /// Idle connections are closed after this many seconds
    pub max_socket_idle_secs: u64,
    /// Default policies
    pub policies: ClientPolicies,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            hosts: Vec::new(),
            port: DEFAULT_PORT,
            user: None,
            password: None,
            cluster_name: None,
            conn_timeout_ms: 1000,
            tend_interval_ms: 1000,
            max_conns_per_node: 300,
            max_tend_failures: 5,
            max_socket_idle_secs: 55,
            policies: ClientPolicies::default(),
        }
    }
}

impl ClientConfig {
    /// Config seeded with a comma-separated host list such as `"h1:3000,h2"`.
    pub fn with_hosts(hosts: &str) -> Self {
        ClientConfig {
            hosts: split_hosts(hosts),
            ..Default::default()
        }
    }

    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(s)
            .map_err(|e| Error::parameter(format!("Failed to parse client config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `Parameter` error if the file cannot be read, parsed or
    /// fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::parameter(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content).map_err(|e| {
            Error::parameter(format!("Invalid config file '{}': {}", path.display(), e))
        })
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::parameter(format!("Failed to serialize config: {}", e)))
    }

    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_conns_per_node == 0 {
            return Err(Error::parameter("max_conns_per_node must be at least 1"));
        }
        if self.tend_interval_ms == 0 {
            return Err(Error::parameter("tend_interval_ms must be greater than 0"));
        }
        if self.hosts.iter().all(|h| h.trim().is_empty()) && !self.hosts.is_empty() {
            return Err(Error::parameter("host list is empty"));
        }
        Ok(())
    }

    /// Seed hosts: configured hosts, else `AEROSPIKE_HOSTS`, else `localhost`.
    pub fn seed_hosts(&self) -> Result<Vec<Host>> {
        if !self.hosts.is_empty() {
            return Host::parse_list(&self.hosts.join(","), self.port);
        }
        match std::env::var(HOSTS_ENV) {
            Ok(v) if !v.trim().is_empty() => Host::parse_list(&v, self.port),
            _ => Ok(vec![Host::new("localhost", self.port)]),
        }
    }

    /// Login credentials, when a user is configured.
    pub fn credentials(&self) -> Option<Credentials> {
        self.user
            .as_ref()
            .map(|u| Credentials::new(u.clone(), self.password.clone().unwrap_or_default()))
    }

    /// Cluster layer settings.
    pub fn cluster_config(&self) -> Result<ClusterConfig> {
        self.validate()?;
        Ok(ClusterConfig {
            seeds: self.seed_hosts()?,
            cluster_name: self.cluster_name.clone(),
            credentials: self.credentials(),
            conn_timeout: Duration::from_millis(self.conn_timeout_ms),
            tend_interval: Duration::from_millis(self.tend_interval_ms),
            max_conns_per_node: self.max_conns_per_node,
            max_tend_failures: self.max_tend_failures,
            max_socket_idle: Duration::from_secs(self.max_socket_idle_secs),
        })
    }
}

fn split_hosts(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}
