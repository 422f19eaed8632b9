//! The client handle

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;

use aerie_cluster::{Cluster, Host};
use aerie_core::{
    BinSelection, Bins, Error, IndexDataType, Key, OpKind, Operation, Record, Replica, Result,
    ResultCode, Value,
};
use aerie_wire::command::{
    encode_delete, encode_exists, encode_operate, encode_read, encode_touch, encode_udf,
    encode_write,
};
use aerie_wire::{Response, UdfCall};

use crate::batch::{self, BatchRead, BatchRecord};
use crate::config::{ClientConfig, ClientPolicies};
use crate::executor::{Command, Executor, Target};
use crate::index::{self, IndexDefinition};
use crate::job::{IndexJob, Job};
use crate::scan::{self, Query, Scan};
use crate::stream::RecordStream;
use crate::udf::udf_result;

/// Summary of one cluster node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNode {
    /// Node name
    pub name: String,
    /// Socket address
    pub address: SocketAddr,
    /// Eligible for routing
    pub active: bool,
}

/// Info reply from one node.
#[derive(Debug)]
pub struct NodeInfo {
    /// Node name
    pub node: String,
    /// Command to value map, or the node's failure
    pub result: Result<BTreeMap<String, String>>,
}

/// Async client for a cluster.
///
/// Cloning is cheap; clones share the cluster view and connection pools.
/// Every command uses the policies the client was configured with; derive
/// a client with other defaults through [`with_policies`](Self::with_policies).
///
/// ```no_run
/// use aerie_client::{Client, ClientConfig};
/// use aerie_core::{bins, Key};
///
/// # async fn demo() -> aerie_core::Result<()> {
/// let client = Client::connect(&ClientConfig::with_hosts("127.0.0.1:3000")).await?;
/// let key = Key::new("test", "demo", "user-1")?;
/// client.put(&key, &bins! { "name" => "Ada", "age" => 36 }).await?;
/// let record = client.get(&key).await?;
/// assert_eq!(record.generation(), 1);
/// client.close();
/// # Ok(()) }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    executor: Executor,
    policies: Arc<ClientPolicies>,
}

impl Client {
    /// Connect to the cluster described by `config`.
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let cluster = Cluster::connect(config.cluster_config()?).await?;
        Ok(Client {
            executor: Executor::new(cluster),
            policies: Arc::new(config.policies.clone()),
        })
    }

    /// Default policies.
    pub fn policies(&self) -> &ClientPolicies {
        &self.policies
    }

    /// A client sharing this one's cluster but using other default policies.
    pub fn with_policies(&self, policies: ClientPolicies) -> Client {
        Client {
            executor: self.executor.clone(),
            policies: Arc::new(policies),
        }
    }

    /// The underlying cluster view.
    pub fn cluster(&self) -> &Arc<Cluster> {
        self.executor.cluster()
    }

    /// Stop tending and close every connection. Affects all clones.
    pub fn close(&self) {
        self.cluster().close();
    }

    /// True while open with at least one active node.
    pub fn is_connected(&self) -> bool {
        self.cluster().is_connected()
    }

    // ========================================================================
    // Single-record reads
    // ========================================================================

    async fn read(&self, key: &Key, bins: &BinSelection) -> Result<Record> {
        let policy = &self.policies.read;
        let request = encode_read(key, bins, policy)?;
        let cmd = Command {
            name: "get",
            target: Target::Key {
                key,
                replica: policy.replica,
                is_write: false,
            },
            policy: &policy.base,
            idempotent: true,
        };
        let resp = self.executor.execute(&cmd, &request).await?.into_result()?;
        Ok(Record::new(key.clone(), resp.bins, resp.metadata))
    }

    /// Read every bin of a record.
    ///
    /// A missing record is a `RecordNotFound` server error.
    pub async fn get(&self, key: &Key) -> Result<Record> {
        self.read(key, &BinSelection::All).await
    }

    /// Read the named bins of a record.
    pub async fn select<S: AsRef<str>>(&self, key: &Key, bins: &[S]) -> Result<Record> {
        self.read(key, &BinSelection::named(bins)).await
    }

    /// Read a record's metadata only.
    pub async fn get_header(&self, key: &Key) -> Result<Record> {
        self.read(key, &BinSelection::Header).await
    }

    /// True when the record exists.
    pub async fn exists(&self, key: &Key) -> Result<bool> {
        let policy = &self.policies.read;
        let request = encode_exists(key, policy)?;
        let cmd = Command {
            name: "exists",
            target: Target::Key {
                key,
                replica: policy.replica,
                is_write: false,
            },
            policy: &policy.base,
            idempotent: true,
        };
        let resp = self.executor.execute(&cmd, &request).await?;
        found(resp)
    }

    // ========================================================================
    // Single-record writes
    // ========================================================================

    async fn write_command(
        &self,
        name: &'static str,
        key: &Key,
        request: Bytes,
    ) -> Result<Response> {
        let policy = &self.policies.write;
        let cmd = Command {
            name,
            target: Target::Key {
                key,
                replica: Replica::Master,
                is_write: true,
            },
            policy: &policy.base,
            idempotent: policy.retry_safe,
        };
        self.executor.execute(&cmd, &request).await
    }

    async fn write_bins(
        &self,
        name: &'static str,
        key: &Key,
        bins: &Bins,
        kind: OpKind,
    ) -> Result<()> {
        let request = encode_write(key, bins, kind, &self.policies.write)?;
        self.write_command(name, key, request).await?.into_result()?;
        Ok(())
    }

    /// Write bins, creating the record if needed. A `Null` value deletes its bin.
    pub async fn put(&self, key: &Key, bins: &Bins) -> Result<()> {
        self.write_bins("put", key, bins, OpKind::Write).await
    }

    /// Append to string or bytes bins.
    pub async fn append(&self, key: &Key, bins: &Bins) -> Result<()> {
        self.write_bins("append", key, bins, OpKind::Append).await
    }

    /// Prepend to string or bytes bins.
    pub async fn prepend(&self, key: &Key, bins: &Bins) -> Result<()> {
        self.write_bins("prepend", key, bins, OpKind::Prepend).await
    }

    /// Add to integer or float bins; missing bins start at zero.
    pub async fn add(&self, key: &Key, bins: &Bins) -> Result<()> {
        self.write_bins("add", key, bins, OpKind::Incr).await
    }

    /// Same as [`add`](Self::add).
    pub async fn incr(&self, key: &Key, bins: &Bins) -> Result<()> {
        self.add(key, bins).await
    }

    /// Reset a record's TTL and bump its generation.
    pub async fn touch(&self, key: &Key) -> Result<()> {
        let request = encode_touch(key, &self.policies.write)?;
        self.write_command("touch", key, request).await?.into_result()?;
        Ok(())
    }

    /// Delete a record. Returns whether it existed.
    pub async fn remove(&self, key: &Key) -> Result<bool> {
        let request = encode_delete(key, &self.policies.write)?;
        let resp = self.write_command("remove", key, request).await?;
        found(resp)
    }

    /// Run operations on one record, in order, as one command.
    ///
    /// Read results come back as bins of the returned record.
    pub async fn operate(&self, key: &Key, ops: &[Operation]) -> Result<Record> {
        if ops.is_empty() {
            return Err(Error::parameter("operate needs at least one operation"));
        }
        let policy = &self.policies.write;
        let request = encode_operate(key, ops, policy)?;
        let is_write = ops.iter().any(|op| op.kind.is_write());
        let cmd = Command {
            name: "operate",
            target: Target::Key {
                key,
                replica: Replica::Master,
                is_write,
            },
            policy: &policy.base,
            idempotent: !is_write || policy.retry_safe,
        };
        let resp = self.executor.execute(&cmd, &request).await?.into_result()?;
        Ok(Record::new(key.clone(), resp.bins, resp.metadata))
    }

    /// Run a record UDF and return its value.
    pub async fn apply(
        &self,
        key: &Key,
        module: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Value> {
        let call = udf_call(module, function, args);
        let request = encode_udf(key, &call, &self.policies.write)?;
        let resp = self.write_command("apply", key, request).await?;
        udf_result(resp)
    }

    /// Same as [`apply`](Self::apply).
    pub async fn execute(
        &self,
        key: &Key,
        module: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Value> {
        self.apply(key, module, function, args).await
    }

    // ========================================================================
    // Batch
    // ========================================================================

    /// Read many keys, each with its own bin selection.
    ///
    /// Results follow the input order. Each entry carries its own status.
    pub async fn batch_read(&self, reads: &[BatchRead]) -> Result<Vec<BatchRecord>> {
        if self.cluster().is_closed() {
            return Err(Error::connection("client is closed"));
        }
        Ok(batch::batch_read(&self.executor, reads, &self.policies.batch).await)
    }

    /// Read every bin of many keys.
    pub async fn batch_get(&self, keys: &[Key]) -> Result<Vec<BatchRecord>> {
        self.batch_with(keys, BinSelection::All).await
    }

    /// Read the named bins of many keys.
    pub async fn batch_select<S: AsRef<str>>(
        &self,
        keys: &[Key],
        bins: &[S],
    ) -> Result<Vec<BatchRecord>> {
        self.batch_with(keys, BinSelection::named(bins)).await
    }

    /// Check many keys for existence; see [`BatchRecord::exists`].
    pub async fn batch_exists(&self, keys: &[Key]) -> Result<Vec<BatchRecord>> {
        self.batch_with(keys, BinSelection::Header).await
    }

    async fn batch_with(&self, keys: &[Key], bins: BinSelection) -> Result<Vec<BatchRecord>> {
        let reads: Vec<BatchRead> = keys
            .iter()
            .map(|k| BatchRead {
                key: k.clone(),
                bins: bins.clone(),
            })
            .collect();
        self.batch_read(&reads).await
    }

    // ========================================================================
    // Scan and query
    // ========================================================================

    /// Stream every record matched by `scan`.
    pub fn scan(&self, scan: &Scan) -> Result<RecordStream> {
        scan::scan(&self.executor, scan, &self.policies.scan)
    }

    /// Run a record UDF over every record matched by `scan`, server-side.
    pub async fn scan_background(
        &self,
        scan: &Scan,
        module: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Job> {
        let call = udf_call(module, function, args);
        scan::scan_background(&self.executor, scan, &call, &self.policies.scan).await
    }

    /// Stream records matching a secondary-index query.
    pub fn query(&self, query: &Query) -> Result<RecordStream> {
        scan::query(&self.executor, query, &self.policies.query)
    }

    /// Run a record UDF over every record matching `query`, server-side.
    pub async fn query_background(
        &self,
        query: &Query,
        module: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Job> {
        let call = udf_call(module, function, args);
        scan::query_background(&self.executor, query, &call, &self.policies.query).await
    }

    // ========================================================================
    // Secondary indexes
    // ========================================================================

    /// Create a secondary index. The returned job tracks the build.
    pub async fn create_index(&self, def: &IndexDefinition) -> Result<IndexJob> {
        index::create_index(&self.executor, def, &self.policies.info).await
    }

    /// Create an integer index on `bin`.
    pub async fn create_integer_index(
        &self,
        namespace: &str,
        set: Option<&str>,
        bin: &str,
        name: &str,
    ) -> Result<IndexJob> {
        self.create_index(&IndexDefinition::new(namespace, set, bin, name, IndexDataType::Numeric))
            .await
    }

    /// Create a string index on `bin`.
    pub async fn create_string_index(
        &self,
        namespace: &str,
        set: Option<&str>,
        bin: &str,
        name: &str,
    ) -> Result<IndexJob> {
        self.create_index(&IndexDefinition::new(namespace, set, bin, name, IndexDataType::String))
            .await
    }

    /// Create a GeoJSON index on `bin`.
    pub async fn create_geo2dsphere_index(
        &self,
        namespace: &str,
        set: Option<&str>,
        bin: &str,
        name: &str,
    ) -> Result<IndexJob> {
        let def = IndexDefinition::new(namespace, set, bin, name, IndexDataType::Geo2dSphere);
        self.create_index(&def).await
    }

    /// Drop a secondary index.
    pub async fn index_remove(&self, namespace: &str, name: &str) -> Result<()> {
        index::remove_index(&self.executor, namespace, name, &self.policies.info).await
    }

    /// Wait until every node reports the index fully built.
    pub async fn index_create_wait(
        &self,
        namespace: &str,
        name: &str,
        poll: Duration,
    ) -> Result<()> {
        IndexJob::new(self.executor.clone(), namespace, name)
            .wait_until_done(poll)
            .await
    }

    // ========================================================================
    // Info
    // ========================================================================

    /// Run info commands on the named node.
    pub async fn info(&self, node: &str, commands: &[&str]) -> Result<BTreeMap<String, String>> {
        let node = self.cluster().node(node)?;
        node.info(commands, self.policies.info.timeout()).await
    }

    /// Run info commands on a random active node.
    pub async fn info_any(&self, commands: &[&str]) -> Result<BTreeMap<String, String>> {
        let node = self.cluster().random_node()?;
        node.info(commands, self.policies.info.timeout()).await
    }

    /// Run info commands on every active node.
    pub async fn info_all(&self, commands: &[&str]) -> Result<Vec<NodeInfo>> {
        let nodes = self.cluster().active_nodes();
        if nodes.is_empty() {
            return Err(Error::invalid_node("cluster has no active nodes"));
        }
        let timeout = self.policies.info.timeout();
        let replies = join_all(nodes.iter().map(|n| n.info(commands, timeout))).await;
        Ok(nodes
            .iter()
            .zip(replies)
            .map(|(n, result)| NodeInfo {
                node: n.name().to_string(),
                result,
            })
            .collect())
    }

    /// Run info commands on a host outside the cluster's pools.
    pub async fn info_host(
        &self,
        host: &Host,
        commands: &[&str],
    ) -> Result<BTreeMap<String, String>> {
        let creds = self.cluster().config().credentials.clone();
        aerie_cluster::info_host(host, commands, self.policies.info.timeout(), creds.as_ref()).await
    }

    /// Known nodes.
    pub fn cluster_nodes(&self) -> Vec<ClusterNode> {
        self.cluster()
            .nodes()
            .iter()
            .map(|n| ClusterNode {
                name: n.name().to_string(),
                address: n.addr(),
                active: n.is_active(),
            })
            .collect()
    }
}

fn udf_call(module: &str, function: &str, args: &[Value]) -> UdfCall {
    UdfCall {
        module: module.to_string(),
        function: function.to_string(),
        args: args.to_vec(),
    }
}

/// `Ok` means found, `RecordNotFound` means absent, anything else is an error.
fn found(resp: Response) -> Result<bool> {
    match resp.result_code {
        ResultCode::Ok => Ok(true),
        ResultCode::RecordNotFound => Ok(false),
        code => Err(Error::from_code(code)),
    }
}
