//! One mock server node
//!
//! Each node owns a TCP listener and serves info, admin and message frames
//! against the store shared by the whole mock cluster. Node `i` of `n`
//! masters partition `p` when `p % n == i`; with a replication factor of 2
//! it also holds the prole copy of the partitions mastered by node `i - 1`.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use aerie_core::key::partition_id;
use aerie_core::limits::PARTITIONS;
use aerie_core::operations::OpValue;
use aerie_core::{
    BinSelection, Bins, Digest, IndexDataType, IndexType, OpKind, Operation, ResultCode,
    UserKey, Value,
};
use aerie_wire::command::{
    decode_batch_index, decode_bin_list, decode_index_range, decode_operation, decode_udf_args,
    decode_user_key, user_key_field, UDF_OP_BACKGROUND,
};
use aerie_wire::message::*;
use aerie_wire::response::{bin_op, citrusleaf_now, encode_messages};
use aerie_wire::{admin, info};
use aerie_wire::{FrameDecoder, ProtoType};

use crate::cdt;
use crate::store::{filter_matches, now_ms, IndexDef, Store, StoredRecord};

/// Records per streamed frame.
const STREAM_CHUNK: usize = 16;

/// UDF module the mock knows.
pub const ECHO_MODULE: &str = "echo";

type Outcome<T> = std::result::Result<T, ResultCode>;

/// State shared by every node of one mock cluster.
pub(crate) struct Shared {
    pub(crate) store: Arc<Store>,
    pub(crate) cluster_name: String,
    pub(crate) namespaces: Vec<String>,
    pub(crate) replication: usize,
    pub(crate) users: BTreeMap<String, [u8; 32]>,
    pub(crate) nodes: RwLock<Vec<MockNode>>,
    write_lock: Mutex<()>,
}

impl Shared {
    pub(crate) fn new(
        store: Arc<Store>,
        cluster_name: String,
        namespaces: Vec<String>,
        replication: usize,
        users: BTreeMap<String, [u8; 32]>,
    ) -> Self {
        Shared {
            store,
            cluster_name,
            namespaces,
            replication,
            users,
            nodes: RwLock::new(Vec::new()),
            write_lock: Mutex::new(()),
        }
    }

    fn node_count(&self) -> usize {
        self.nodes.read().len().max(1)
    }
}

/// Progress of a background scan or query on one node.
#[derive(Default)]
struct JobState {
    module: String,
    done: AtomicBool,
    records: AtomicU64,
}

struct NodeState {
    name: String,
    index: usize,
    addr: SocketAddr,
    shared: Arc<Shared>,
    partition_generation: AtomicI64,
    drop_next: AtomicUsize,
    delay_ms: AtomicU64,
    fail_info: AtomicBool,
    requests: AtomicU64,
    connections: AtomicU64,
    jobs: DashMap<u64, Arc<JobState>>,
    cancel: CancellationToken,
}

/// Handle to one mock node.
#[derive(Clone)]
pub struct MockNode {
    state: Arc<NodeState>,
}

impl std::fmt::Debug for MockNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNode")
            .field("name", &self.state.name)
            .field("addr", &self.state.addr)
            .field("running", &self.is_running())
            .finish()
    }
}

impl MockNode {
    pub(crate) async fn bind(index: usize, shared: Arc<Shared>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let node = MockNode {
            state: Arc::new(NodeState {
                name: format!("BB9{:012X}", index + 1),
                index,
                addr,
                shared,
                partition_generation: AtomicI64::new(1),
                drop_next: AtomicUsize::new(0),
                delay_ms: AtomicU64::new(0),
                fail_info: AtomicBool::new(false),
                requests: AtomicU64::new(0),
                connections: AtomicU64::new(0),
                jobs: DashMap::new(),
                cancel: CancellationToken::new(),
            }),
        };
        tokio::spawn(accept_loop(Arc::clone(&node.state), listener));
        Ok(node)
    }

    /// Node name as reported by the `node` info command.
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Listening address.
    pub fn addr(&self) -> SocketAddr {
        self.state.addr
    }

    /// `host:port` of the listener.
    pub fn host(&self) -> String {
        self.state.addr.to_string()
    }

    /// Close the connection instead of answering the next `n` message
    /// requests. Info and login requests are not affected.
    pub fn drop_next_requests(&self, n: usize) {
        self.state.drop_next.store(n, Ordering::SeqCst);
    }

    /// Sleep this long before answering each message request.
    pub fn set_delay(&self, delay: Duration) {
        self.state
            .delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// While set, info requests close the connection.
    pub fn fail_info(&self, fail: bool) {
        self.state.fail_info.store(fail, Ordering::SeqCst);
    }

    /// Change the reported partition generation.
    pub fn set_partition_generation(&self, generation: i64) {
        self.state
            .partition_generation
            .store(generation, Ordering::SeqCst);
    }

    /// Stop listening and close every open connection. Permanent.
    pub fn stop(&self) {
        self.state.cancel.cancel();
    }

    /// False after [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        !self.state.cancel.is_cancelled()
    }

    /// Message requests received, dropped ones included.
    pub fn requests(&self) -> u64 {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Connections accepted.
    pub fn connections(&self) -> u64 {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// True when this node masters `partition`.
    pub fn masters(&self, partition: usize) -> bool {
        self.state.masters(partition)
    }
}

async fn accept_loop(node: Arc<NodeState>, listener: TcpListener) {
    loop {
        let accepted = tokio::select! {
            _ = node.cancel.cancelled() => break,
            a = listener.accept() => a,
        };
        match accepted {
            Ok((stream, peer)) => {
                node.connections.fetch_add(1, Ordering::SeqCst);
                let _ = stream.set_nodelay(true);
                debug!(target: "aerie::mock", node = %node.name, %peer, "Accepted connection");
                tokio::spawn(serve_connection(Arc::clone(&node), stream));
            }
            Err(e) => {
                debug!(target: "aerie::mock", node = %node.name, error = %e, "Accept failed");
            }
        }
    }
    debug!(target: "aerie::mock", node = %node.name, "Listener stopped");
}

async fn serve_connection(node: Arc<NodeState>, mut stream: TcpStream) {
    let mut buf = BytesMut::with_capacity(8 * 1024);
    let mut decoder = FrameDecoder::new();
    let mut authenticated = node.shared.users.is_empty();
    loop {
        let frame = loop {
            match decoder.decode(&mut buf) {
                Ok(Some(f)) => break f,
                Ok(None) => {}
                Err(_) => return,
            }
            let read = tokio::select! {
                _ = node.cancel.cancelled() => return,
                r = stream.read_buf(&mut buf) => r,
            };
            match read {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        };

        let written = match frame.kind {
            ProtoType::Admin => {
                let code = node.login(&frame.payload);
                authenticated = code == ResultCode::Ok;
                stream.write_all(&admin::encode_admin_response(code)).await
            }
            ProtoType::Info => {
                if node.fail_info.load(Ordering::SeqCst) {
                    return;
                }
                let Ok(cmds) = info::parse_info_request(&frame.payload) else {
                    return;
                };
                stream.write_all(&node.answer_info(&cmds, authenticated)).await
            }
            ProtoType::Message => {
                node.requests.fetch_add(1, Ordering::SeqCst);
                let dropped = node
                    .drop_next
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if dropped {
                    debug!(target: "aerie::mock", node = %node.name, "Dropping request");
                    return;
                }
                let delay = node.delay_ms.load(Ordering::SeqCst);
                if delay > 0 {
                    tokio::select! {
                        _ = node.cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                    }
                }
                if !authenticated {
                    stream
                        .write_all(&encode_messages(&[status_message(ResultCode::NotAuthenticated, true)]))
                        .await
                } else {
                    node.answer_message(&frame.payload, &mut stream).await
                }
            }
        };
        if written.is_err() {
            return;
        }
    }
}

fn status_message(code: ResultCode, last: bool) -> Message {
    let mut m = Message::default();
    m.header.result_code = code.code() as u8;
    if last {
        m.header.info3 = INFO3_LAST;
    }
    m
}

fn field_str(msg: &Message, kind: u8) -> Option<&str> {
    msg.field(kind).and_then(|f| f.as_str().ok())
}

fn field_u64(msg: &Message, kind: u8) -> Option<u64> {
    let data: [u8; 8] = msg.field(kind)?.data.as_slice().try_into().ok()?;
    Some(u64::from_be_bytes(data))
}

fn is_live(rec: &StoredRecord, now: u32) -> bool {
    rec.void_time == 0 || rec.void_time > now
}

/// Void-time for a write carrying `ttl` in the expiration slot.
fn void_time(ttl: u32, previous: Option<u32>, now: u32) -> u32 {
    match ttl as i32 {
        0 | -1 => 0,
        -2 => previous.unwrap_or(0),
        secs => now.saturating_add(secs.max(0) as u32),
    }
}

fn selection_from(header: &MsgHeader, named: Vec<String>) -> BinSelection {
    if header.info1 & INFO1_NOBINDATA != 0 {
        BinSelection::Header
    } else if header.info1 & INFO1_GET_ALL != 0 || named.is_empty() {
        BinSelection::All
    } else {
        BinSelection::Named(named)
    }
}

fn select_bins(bins: &Bins, selection: &BinSelection) -> Outcome<Vec<WireOp>> {
    let pick = |name: &String, value: &Value| bin_op(name, value).map_err(|_| ResultCode::Server);
    match selection {
        BinSelection::Header => Ok(Vec::new()),
        BinSelection::All => bins.iter().map(|(n, v)| pick(n, v)).collect(),
        BinSelection::Named(names) => names
            .iter()
            .filter_map(|n| bins.get(n).map(|v| pick(n, v)))
            .collect(),
    }
}

fn record_message(
    code: ResultCode,
    rec: Option<&StoredRecord>,
    ops: Vec<WireOp>,
    fields: Vec<Field>,
) -> Message {
    let mut m = status_message(code, false);
    if let Some(rec) = rec {
        m.header.generation = rec.generation;
        m.header.expiration = rec.void_time;
        m.fields.push(Field::u64(field::LAST_UPDATE_TIME, rec.last_update_ms));
    }
    m.fields.extend(fields);
    m.ops = ops;
    m
}

/// Fields identifying a record in a stream response.
fn key_fields(namespace: &str, digest: &Digest, rec: &StoredRecord) -> Vec<Field> {
    let mut fields = vec![
        Field::string(field::NAMESPACE, namespace),
        Field::new(field::DIGEST, digest.to_vec()),
    ];
    if !rec.set.is_empty() {
        fields.push(Field::string(field::SET, &rec.set));
    }
    if let Some(k) = &rec.user_key {
        fields.push(user_key_field(k));
    }
    fields
}

fn add_values(current: Option<&Value>, delta: &Value) -> Outcome<Value> {
    match (current, delta) {
        (None, d @ (Value::Int(_) | Value::Float(_))) => Ok(d.clone()),
        (Some(Value::Int(a)), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (Some(Value::Float(a)), Value::Float(b)) => Ok(Value::Float(a + b)),
        _ => Err(ResultCode::BinIncompatibleType),
    }
}

fn concat(current: Option<&Value>, extra: &Value, prepend: bool) -> Outcome<Value> {
    let join = |a: &[u8], b: &[u8]| -> Vec<u8> {
        if prepend {
            [b, a].concat()
        } else {
            [a, b].concat()
        }
    };
    match (current, extra) {
        (None, v @ (Value::String(_) | Value::Bytes(_))) => Ok(v.clone()),
        (Some(Value::String(a)), Value::String(b)) => {
            let bytes = join(a.as_bytes(), b.as_bytes());
            Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        }
        (Some(Value::Bytes(a)), Value::Bytes(b)) => Ok(Value::Bytes(join(a, b))),
        _ => Err(ResultCode::BinIncompatibleType),
    }
}

/// Result of the `echo` UDF module against one record.
struct UdfOutcome {
    code: ResultCode,
    bin: &'static str,
    value: Value,
}

/// Run a function of the `echo` module. `bins` is `None` for a missing
/// record; `put_bin` creates it.
fn run_udf(module: &str, function: &str, args: &[Value], bins: &mut Option<Bins>) -> UdfOutcome {
    let fail = |msg: String| UdfOutcome {
        code: ResultCode::Udf,
        bin: "FAILURE",
        value: Value::String(msg),
    };
    let ok = |value: Value| UdfOutcome {
        code: ResultCode::Ok,
        bin: "SUCCESS",
        value,
    };
    if module != ECHO_MODULE {
        return fail(format!("module {} not found", module));
    }
    match function {
        "echo" => ok(args.first().cloned().unwrap_or(Value::Null)),
        "get_bin" => match args.first().and_then(Value::as_str) {
            Some(name) => ok(bins
                .as_ref()
                .and_then(|b| b.get(name).cloned())
                .unwrap_or(Value::Null)),
            None => fail("get_bin expects a bin name".into()),
        },
        "put_bin" => match (args.first().and_then(Value::as_str), args.get(1)) {
            (Some(name), Some(value)) => {
                bins.get_or_insert_with(Bins::new)
                    .insert(name.to_string(), value.clone());
                ok(value.clone())
            }
            _ => fail("put_bin expects a bin name and a value".into()),
        },
        "fail" => fail(
            args.first()
                .and_then(Value::as_str)
                .unwrap_or("failed")
                .to_string(),
        ),
        other => fail(format!("function {} not found", other)),
    }
}

impl NodeState {
    fn masters(&self, partition: usize) -> bool {
        partition % self.shared.node_count() == self.index
    }

    fn holds_prole(&self, partition: usize) -> bool {
        let n = self.shared.node_count();
        self.shared.replication > 1 && n > 1 && (partition % n + 1) % n == self.index
    }

    fn login(&self, payload: &[u8]) -> ResultCode {
        let Ok(req) = admin::decode_login(payload) else {
            return ResultCode::RequestInvalid;
        };
        match self.shared.users.get(&req.user) {
            None => ResultCode::InvalidUser,
            Some(hash) if hash[..] == req.credential[..] => ResultCode::Ok,
            Some(_) => ResultCode::InvalidPassword,
        }
    }

    // ------------------------------------------------------------------
    // info

    fn answer_info(&self, cmds: &[String], authenticated: bool) -> Bytes {
        let values: Vec<(String, String)> = cmds
            .iter()
            .map(|c| {
                let v = if authenticated {
                    self.info_value(c)
                } else {
                    "ERROR:80:not authenticated".to_string()
                };
                (c.clone(), v)
            })
            .collect();
        info::encode_info_response(values.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    fn replicas_value(&self) -> String {
        let n = self.shared.node_count();
        let copies = self.shared.replication.clamp(1, n);
        let mut master = vec![0u8; PARTITIONS / 8];
        let mut prole = vec![0u8; PARTITIONS / 8];
        for p in 0..PARTITIONS {
            if self.masters(p) {
                master[p >> 3] |= 0x80 >> (p & 7);
            }
            if self.holds_prole(p) {
                prole[p >> 3] |= 0x80 >> (p & 7);
            }
        }
        self.shared
            .namespaces
            .iter()
            .map(|ns| {
                let mut s = format!("{}:0,{},{}", ns, copies, STANDARD.encode(&master));
                if copies > 1 {
                    s.push(',');
                    s.push_str(&STANDARD.encode(&prole));
                }
                s
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    fn services_value(&self) -> String {
        self.shared
            .nodes
            .read()
            .iter()
            .filter(|n| n.state.index != self.index && n.is_running())
            .map(|n| n.host())
            .collect::<Vec<_>>()
            .join(";")
    }

    fn info_value(&self, cmd: &str) -> String {
        match cmd {
            "node" => return self.name.clone(),
            "partition-generation" => {
                return self.partition_generation.load(Ordering::SeqCst).to_string()
            }
            "services" => return self.services_value(),
            "replicas" => return self.replicas_value(),
            "cluster-name" => return self.shared.cluster_name.clone(),
            "namespaces" => return self.shared.namespaces.join(";"),
            "build" => return env!("CARGO_PKG_VERSION").to_string(),
            "statistics" => {
                return format!(
                    "objects={};client_connections={};requests={}",
                    self.shared.store.len(),
                    self.connections.load(Ordering::SeqCst),
                    self.requests.load(Ordering::SeqCst)
                )
            }
            _ => {}
        }
        if let Some(rest) = cmd.strip_prefix("sindex-create:") {
            return self.sindex_create(rest);
        }
        if let Some(rest) = cmd.strip_prefix("sindex-delete:") {
            let args = info::parse_pairs(rest);
            let ns = args.get("ns").map(String::as_str).unwrap_or("");
            let name = args.get("indexname").map(String::as_str).unwrap_or("");
            return match self.shared.store.drop_index(ns, name) {
                Ok(()) => "OK".into(),
                Err(_) => "FAIL:201:Index does not exist".into(),
            };
        }
        if let Some(rest) = cmd.strip_prefix("sindex/") {
            return self.sindex_status(rest);
        }
        if let Some(rest) = cmd.strip_prefix("jobs:") {
            return self.job_status(rest);
        }
        "ERROR::unrecognized command".into()
    }

    fn sindex_create(&self, rest: &str) -> String {
        let args = info::parse_pairs(rest);
        let get = |k: &str| args.get(k).map(String::as_str).unwrap_or("");
        let (bin, data_type) = get("indexdata").split_once(',').unwrap_or(("", ""));
        let Some(data_type) = IndexDataType::from_info_name(data_type) else {
            return "FAIL:4:Invalid indexdata".into();
        };
        let index_type = match args.get("indextype") {
            Some(t) => match IndexType::from_info_name(t) {
                Some(t) => t,
                None => return "FAIL:4:Invalid indextype".into(),
            },
            None => IndexType::Default,
        };
        if get("ns").is_empty() || get("indexname").is_empty() || bin.is_empty() {
            return "FAIL:4:Missing parameter".into();
        }
        let def = IndexDef {
            namespace: get("ns").to_string(),
            set: args.get("set").filter(|s| !s.is_empty()).cloned(),
            name: get("indexname").to_string(),
            bin: bin.to_string(),
            index_type,
            data_type,
        };
        match self.shared.store.create_index(def) {
            Ok(()) => "OK".into(),
            Err(_) => "FAIL:200:Index with the same name already exists".into(),
        }
    }

    fn sindex_status(&self, rest: &str) -> String {
        match rest.split_once('/') {
            Some((ns, name)) => match self.shared.store.index(ns, name) {
                Some(_) => "load_pct=100;state=RW".into(),
                None => "FAIL:201:Index does not exist".into(),
            },
            None => self
                .shared
                .store
                .indexes(rest)
                .iter()
                .map(|d| {
                    format!(
                        "ns={}:indexname={}:bin={}:type={}:indextype={}",
                        d.namespace,
                        d.name,
                        d.bin,
                        d.data_type.info_name(),
                        d.index_type.info_name()
                    )
                })
                .collect::<Vec<_>>()
                .join(";"),
        }
    }

    fn job_status(&self, rest: &str) -> String {
        let args = info::parse_pairs(rest);
        let Some(trid) = args.get("trid").and_then(|t| t.parse::<u64>().ok()) else {
            return "ERROR:4:missing trid".into();
        };
        let Some(job) = self.jobs.get(&trid).map(|j| Arc::clone(&j)) else {
            return "ERROR:2:job not found".into();
        };
        let done = job.done.load(Ordering::SeqCst);
        format!(
            "module={}:trid={}:status={}:job-progress={}:recs-read={}",
            job.module,
            trid,
            if done { "done(ok)" } else { "active(ok)" },
            if done { 100 } else { 0 },
            job.records.load(Ordering::SeqCst)
        )
    }

    // ------------------------------------------------------------------
    // messages

    async fn answer_message(&self, payload: &[u8], stream: &mut TcpStream) -> std::io::Result<()> {
        let req = match Message::decode_all(payload) {
            Ok(mut msgs) if !msgs.is_empty() => msgs.remove(0),
            _ => {
                let reply = status_message(ResultCode::RequestInvalid, true);
                return stream.write_all(&encode_messages(&[reply])).await;
            }
        };
        if req.header.info1 & INFO1_BATCH != 0 {
            let msgs = self.batch(&req);
            return write_stream(stream, msgs).await;
        }
        if req.field(field::TASK_ID).is_some() {
            let msgs = match self.stream_records(&req) {
                Ok(msgs) => msgs,
                Err(code) => vec![status_message(code, true)],
            };
            return write_stream(stream, msgs).await;
        }
        let reply = if req.field(field::UDF_PACKAGE).is_some() {
            self.record_udf(&req)
        } else {
            self.record_command(&req)
        };
        let reply = reply.unwrap_or_else(|code| status_message(code, false));
        stream.write_all(&encode_messages(&[reply])).await
    }

    fn record_target(&self, req: &Message) -> Outcome<(String, String, Digest, Option<UserKey>)> {
        let ns = field_str(req, field::NAMESPACE).ok_or(ResultCode::RequestInvalid)?;
        if !self.shared.namespaces.iter().any(|n| n == ns) {
            return Err(ResultCode::NamespaceNotFound);
        }
        let digest: Digest = req
            .field(field::DIGEST)
            .and_then(|f| f.data.as_slice().try_into().ok())
            .ok_or(ResultCode::RequestInvalid)?;
        let set = field_str(req, field::SET).unwrap_or("").to_string();
        let user_key = match req.field(field::KEY) {
            Some(f) => Some(decode_user_key(&f.data).map_err(|_| ResultCode::RequestInvalid)?),
            None => None,
        };
        Ok((ns.to_string(), set, digest, user_key))
    }

    fn record_command(&self, req: &Message) -> Outcome<Message> {
        let (ns, set, digest, user_key) = self.record_target(req)?;
        let ops: Vec<Operation> = req
            .ops
            .iter()
            .map(decode_operation)
            .collect::<aerie_core::Result<_>>()
            .map_err(|_| ResultCode::RequestInvalid)?;
        let h = req.header;
        let store = &self.shared.store;
        let now = citrusleaf_now();

        if h.info2 & INFO2_WRITE == 0 {
            let rec = store
                .get(&ns, &digest)
                .filter(|r| is_live(r, now))
                .ok_or(ResultCode::RecordNotFound)?;
            let mut bins = rec.bins.clone();
            let out = if h.info1 & INFO1_NOBINDATA != 0 && ops.is_empty() {
                Vec::new()
            } else if h.info1 & INFO1_GET_ALL != 0 {
                select_bins(&rec.bins, &BinSelection::All)?
            } else {
                let mut out = Vec::new();
                for op in &ops {
                    if let Some(v) = read_op(&mut bins, op)? {
                        out.push(bin_op(&op.bin, &v).map_err(|_| ResultCode::Server)?);
                    }
                }
                out
            };
            return Ok(record_message(ResultCode::Ok, Some(&rec), out, Vec::new()));
        }

        let _guard = self.shared.write_lock.lock();
        let existing = store.get(&ns, &digest).filter(|r| is_live(r, now));
        let current_gen = existing.as_ref().map_or(0, |r| r.generation);
        if h.info2 & INFO2_GENERATION != 0 && current_gen != h.generation {
            return Err(ResultCode::Generation);
        }
        if h.info2 & INFO2_GENERATION_GT != 0 && existing.is_some() && h.generation <= current_gen {
            return Err(ResultCode::Generation);
        }
        if h.info2 & INFO2_CREATE_ONLY != 0 && existing.is_some() {
            return Err(ResultCode::RecordExists);
        }
        if h.info3 & (INFO3_UPDATE_ONLY | INFO3_REPLACE_ONLY) != 0 && existing.is_none() {
            return Err(ResultCode::RecordNotFound);
        }
        if h.info2 & INFO2_DELETE != 0 && ops.is_empty() {
            let rec = existing.ok_or(ResultCode::RecordNotFound)?;
            store.remove(&ns, &digest);
            return Ok(record_message(ResultCode::Ok, Some(&rec), Vec::new(), Vec::new()));
        }

        let replace = h.info3 & (INFO3_CREATE_OR_REPLACE | INFO3_REPLACE_ONLY) != 0;
        let mut bins = match &existing {
            Some(r) if !replace => r.bins.clone(),
            _ => Bins::new(),
        };
        let mut results = Vec::new();
        for op in &ops {
            match op.kind {
                OpKind::Read | OpKind::ReadHeader | OpKind::CdtRead => {
                    if op.kind == OpKind::Read && op.bin.is_empty() {
                        results.extend(bins.iter().map(|(k, v)| (k.clone(), v.clone())));
                    } else if let Some(v) = read_op(&mut bins, op)? {
                        results.push((op.bin.clone(), v));
                    }
                }
                OpKind::Write => match &op.value {
                    OpValue::Value(Value::Null) => {
                        bins.remove(&op.bin);
                    }
                    OpValue::Value(v) => {
                        bins.insert(op.bin.clone(), v.clone());
                    }
                    _ => return Err(ResultCode::RequestInvalid),
                },
                OpKind::Incr => {
                    let OpValue::Value(delta) = &op.value else {
                        return Err(ResultCode::RequestInvalid);
                    };
                    let next = add_values(bins.get(&op.bin), delta)?;
                    bins.insert(op.bin.clone(), next);
                }
                OpKind::Append | OpKind::Prepend => {
                    let OpValue::Value(extra) = &op.value else {
                        return Err(ResultCode::RequestInvalid);
                    };
                    let next = concat(bins.get(&op.bin), extra, op.kind == OpKind::Prepend)?;
                    bins.insert(op.bin.clone(), next);
                }
                OpKind::Touch => {
                    if existing.is_none() {
                        return Err(ResultCode::RecordNotFound);
                    }
                }
                OpKind::Delete => bins.clear(),
                OpKind::CdtModify => {
                    let OpValue::Cdt(c) = &op.value else {
                        return Err(ResultCode::RequestInvalid);
                    };
                    let v = cdt::apply(&mut bins, &op.bin, c)?;
                    results.push((op.bin.clone(), v));
                }
            }
        }

        let ops_out = results
            .iter()
            .map(|(name, v)| bin_op(name, v).map_err(|_| ResultCode::Server))
            .collect::<Outcome<Vec<_>>>()?;
        if bins.is_empty() {
            store.remove(&ns, &digest);
            return Ok(record_message(ResultCode::Ok, None, ops_out, Vec::new()));
        }
        let rec = StoredRecord {
            set: existing.as_ref().map_or(set, |r| r.set.clone()),
            user_key: user_key.or_else(|| existing.as_ref().and_then(|r| r.user_key.clone())),
            bins,
            generation: current_gen.wrapping_add(1).max(1),
            void_time: void_time(h.expiration, existing.as_ref().map(|r| r.void_time), now),
            last_update_ms: now_ms(),
        };
        let reply = record_message(ResultCode::Ok, Some(&rec), ops_out, Vec::new());
        store.put(&ns, digest, rec);
        Ok(reply)
    }

    fn record_udf(&self, req: &Message) -> Outcome<Message> {
        let (ns, set, digest, user_key) = self.record_target(req)?;
        let module = field_str(req, field::UDF_PACKAGE).unwrap_or("");
        let function = field_str(req, field::UDF_FUNCTION).unwrap_or("");
        let args = match req.field(field::UDF_ARGLIST) {
            Some(f) => decode_udf_args(&f.data).map_err(|_| ResultCode::RequestInvalid)?,
            None => Vec::new(),
        };
        let _guard = self.shared.write_lock.lock();
        let now = citrusleaf_now();
        let existing = self.shared.store.get(&ns, &digest).filter(|r| is_live(r, now));
        let mut bins = existing.as_ref().map(|r| r.bins.clone());
        let out = run_udf(module, function, &args, &mut bins);
        let op = bin_op(out.bin, &out.value).map_err(|_| ResultCode::Server)?;
        if out.code != ResultCode::Ok {
            return Ok(record_message(out.code, None, vec![op], Vec::new()));
        }
        let changed = bins.as_ref() != existing.as_ref().map(|r| &r.bins);
        match bins {
            Some(bins) if changed => {
                let rec = StoredRecord {
                    set: existing.as_ref().map_or(set, |r| r.set.clone()),
                    user_key: user_key.or_else(|| existing.as_ref().and_then(|r| r.user_key.clone())),
                    bins,
                    generation: existing.as_ref().map_or(0, |r| r.generation).wrapping_add(1).max(1),
                    void_time: existing.as_ref().map_or(0, |r| r.void_time),
                    last_update_ms: now_ms(),
                };
                let reply = record_message(ResultCode::Ok, Some(&rec), vec![op], Vec::new());
                self.shared.store.put(&ns, digest, rec);
                Ok(reply)
            }
            _ => Ok(record_message(ResultCode::Ok, existing.as_ref(), vec![op], Vec::new())),
        }
    }

    fn batch(&self, req: &Message) -> Vec<Message> {
        let entries = match req
            .field(field::BATCH_INDEX)
            .map(|f| decode_batch_index(&f.data))
        {
            Some(Ok(entries)) => entries,
            _ => return vec![status_message(ResultCode::RequestInvalid, true)],
        };
        let now = citrusleaf_now();
        let mut out = Vec::with_capacity(entries.len() + 1);
        for e in entries {
            let found = self
                .shared
                .store
                .get(&e.namespace, &e.digest)
                .filter(|r| is_live(r, now));
            let mut m = match &found {
                Some(rec) => match select_bins(&rec.bins, &e.bins) {
                    Ok(ops) => record_message(ResultCode::Ok, Some(rec), ops, Vec::new()),
                    Err(code) => status_message(code, false),
                },
                None => status_message(ResultCode::RecordNotFound, false),
            };
            m.header.timeout = e.index;
            out.push(m);
        }
        out.push(status_message(ResultCode::Ok, true));
        out
    }

    /// Scan or query: the records this node masters, then a final status.
    fn stream_records(&self, req: &Message) -> Outcome<Vec<Message>> {
        let ns = field_str(req, field::NAMESPACE).ok_or(ResultCode::RequestInvalid)?;
        if !self.shared.namespaces.iter().any(|n| n == ns) {
            return Err(ResultCode::NamespaceNotFound);
        }
        let set = field_str(req, field::SET).filter(|s| !s.is_empty());
        let task_id = field_u64(req, field::TASK_ID).ok_or(ResultCode::RequestInvalid)?;
        let percent = req
            .field(field::SCAN_OPTIONS)
            .and_then(|f| f.data.get(1).copied())
            .unwrap_or(100)
            .clamp(1, 100) as usize;

        let query = match req.field(field::INDEX_RANGE) {
            Some(f) => {
                let index_type = req
                    .field(field::INDEX_TYPE)
                    .and_then(|t| t.data.first().copied())
                    .and_then(IndexType::from_u8)
                    .unwrap_or(IndexType::Default);
                let filter =
                    decode_index_range(&f.data, index_type).map_err(|_| ResultCode::RequestInvalid)?;
                let index = self
                    .shared
                    .store
                    .find_index(ns, field_str(req, field::INDEX_NAME), &filter)
                    .ok_or(ResultCode::IndexNotFound)?;
                Some((index, filter))
            }
            None => None,
        };

        let now = citrusleaf_now();
        let records: Vec<(Digest, StoredRecord)> = self
            .shared
            .store
            .records(ns, set)
            .into_iter()
            .filter(|(d, r)| {
                let p = partition_id(d);
                self.masters(p) && p % 100 < percent && is_live(r, now)
            })
            .filter(|(_, r)| match &query {
                Some((index, filter)) => filter_matches(index, filter, &r.bins),
                None => true,
            })
            .collect();

        let background = req
            .field(field::UDF_OP)
            .map_or(false, |f| f.data.first() == Some(&UDF_OP_BACKGROUND));
        if background {
            self.start_job(req, ns, task_id, query.is_some(), records)?;
            return Ok(vec![status_message(ResultCode::Ok, true)]);
        }

        let named = match req.field(field::QUERY_BINLIST) {
            Some(f) => decode_bin_list(&f.data).map_err(|_| ResultCode::RequestInvalid)?,
            None => req.ops.iter().map(|o| o.name.clone()).collect(),
        };
        let selection = selection_from(&req.header, named);
        let mut out = Vec::with_capacity(records.len() + 1);
        for (digest, rec) in &records {
            let ops = select_bins(&rec.bins, &selection)?;
            out.push(record_message(
                ResultCode::Ok,
                Some(rec),
                ops,
                key_fields(ns, digest, rec),
            ));
        }
        out.push(status_message(ResultCode::Ok, true));
        Ok(out)
    }

    fn start_job(
        &self,
        req: &Message,
        ns: &str,
        task_id: u64,
        is_query: bool,
        records: Vec<(Digest, StoredRecord)>,
    ) -> Outcome<()> {
        let module = field_str(req, field::UDF_PACKAGE).unwrap_or("").to_string();
        let function = field_str(req, field::UDF_FUNCTION).unwrap_or("").to_string();
        let args = match req.field(field::UDF_ARGLIST) {
            Some(f) => decode_udf_args(&f.data).map_err(|_| ResultCode::RequestInvalid)?,
            None => Vec::new(),
        };
        let job = Arc::new(JobState {
            module: if is_query { "query" } else { "scan" }.to_string(),
            ..Default::default()
        });
        self.jobs.insert(task_id, Arc::clone(&job));
        let shared = Arc::clone(&self.shared);
        let ns = ns.to_string();
        tokio::spawn(async move {
            for (digest, _) in records {
                {
                    let _guard = shared.write_lock.lock();
                    if let Some(mut rec) = shared.store.get(&ns, &digest) {
                        let mut bins = Some(rec.bins.clone());
                        run_udf(&module, &function, &args, &mut bins);
                        if let Some(bins) = bins.filter(|b| *b != rec.bins) {
                            rec.bins = bins;
                            rec.generation = rec.generation.wrapping_add(1).max(1);
                            rec.last_update_ms = now_ms();
                            shared.store.put(&ns, digest, rec);
                        }
                    }
                }
                job.records.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
            }
            job.done.store(true, Ordering::SeqCst);
        });
        Ok(())
    }
}

/// Evaluate a read-type operation against `bins`.
fn read_op(bins: &mut Bins, op: &Operation) -> Outcome<Option<Value>> {
    match (op.kind, &op.value) {
        (OpKind::Read, _) => Ok(bins.get(&op.bin).cloned()),
        (OpKind::CdtRead, OpValue::Cdt(c)) => cdt::apply(bins, &op.bin, c).map(Some),
        (OpKind::ReadHeader, _) => Ok(None),
        _ => Err(ResultCode::RequestInvalid),
    }
}

async fn write_stream(stream: &mut TcpStream, msgs: Vec<Message>) -> std::io::Result<()> {
    for chunk in msgs.chunks(STREAM_CHUNK) {
        stream.write_all(&encode_messages(chunk)).await?;
    }
    Ok(())
}
