//! Request encoding
//!
//! Each `encode_*` function validates its input and returns a complete
//! message frame. Validation happens before the frame exists, so a
//! `Parameter` error never leaves a half-written request on a socket.
//!
//! The `decode_*` helpers at the bottom parse the request-only structures
//! (batch entries, index ranges, operations) back out of a message. Servers
//! and test doubles use them.

use bytes::{BufMut, Bytes, BytesMut};

use aerie_core::limits::{check_bin_name, MAX_INDEX_NAME_LEN};
use aerie_core::operations::{OpKind, OpValue, Operation};
use aerie_core::{
    BatchPolicy, BinSelection, Bins, CommitLevel, ConsistencyLevel, Digest, Error, Filter,
    GenerationPolicy, IndexType, Key, KeyPolicy, ParticleType, Predicate, Priority, ReadPolicy,
    RecordExistsAction, Result, UserKey, Value, WritePolicy,
};

use crate::message::*;
use crate::particle::{self, Reader};
use crate::proto::{begin_frame, finish_frame, ProtoType};

/// `UDF_OP` value for a background scan or query UDF.
pub const UDF_OP_BACKGROUND: u8 = 2;

/// A UDF invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct UdfCall {
    /// Module (package) name
    pub module: String,
    /// Function name
    pub function: String,
    /// Arguments
    pub args: Vec<Value>,
}

/// Scan parameters carried in the request.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanParams {
    /// Bins to return
    pub bins: BinSelection,
    /// Percentage of records to scan (1..=100)
    pub percent: u8,
    /// Server scheduling priority
    pub priority: Priority,
    /// Abort if the cluster changes mid-scan
    pub fail_on_cluster_change: bool,
}

impl Default for ScanParams {
    fn default() -> Self {
        ScanParams {
            bins: BinSelection::All,
            percent: 100,
            priority: Priority::Default,
            fail_on_cluster_change: false,
        }
    }
}

/// One key of a batch request.
#[derive(Debug, Clone)]
pub struct BatchKey<'a> {
    /// Position in the caller's key list
    pub index: u32,
    /// Key
    pub key: &'a Key,
    /// Bins to return
    pub bins: &'a BinSelection,
}

fn finish(msg: &Message) -> Bytes {
    let mut out = BytesMut::with_capacity(256);
    let at = begin_frame(&mut out);
    msg.encode(&mut out);
    finish_frame(&mut out, at, ProtoType::Message);
    out.freeze()
}

fn key_fields(key: &Key, send_key: KeyPolicy) -> Vec<Field> {
    let mut fields = vec![Field::string(field::NAMESPACE, key.namespace())];
    if !key.set().is_empty() {
        fields.push(Field::string(field::SET, key.set()));
    }
    fields.push(Field::new(field::DIGEST, key.digest().to_vec()));
    if send_key == KeyPolicy::Send {
        if let Some(user_key) = key.user_key() {
            fields.push(user_key_field(user_key));
        }
    }
    fields
}

/// KEY field: particle type byte followed by the key bytes.
pub fn user_key_field(user_key: &UserKey) -> Field {
    let mut data = vec![user_key.particle_type() as u8];
    data.extend_from_slice(&user_key.to_bytes());
    Field::new(field::KEY, data)
}

fn timeout_ms(ms: u64) -> u32 {
    ms.min(u32::MAX as u64) as u32
}

fn read_header(policy: &ReadPolicy) -> MsgHeader {
    let mut info1 = INFO1_READ;
    if policy.consistency_level == ConsistencyLevel::All {
        info1 |= INFO1_CONSISTENCY_ALL;
    }
    MsgHeader {
        info1,
        timeout: timeout_ms(policy.base.timeout_ms),
        ..Default::default()
    }
}

fn write_header(policy: &WritePolicy) -> MsgHeader {
    let mut h = MsgHeader {
        info2: INFO2_WRITE,
        expiration: policy.ttl as u32,
        timeout: timeout_ms(policy.base.timeout_ms),
        ..Default::default()
    };
    match policy.generation_policy {
        GenerationPolicy::None => {}
        GenerationPolicy::ExpectEqual => {
            h.info2 |= INFO2_GENERATION;
            h.generation = policy.generation;
        }
        GenerationPolicy::ExpectGreater => {
            h.info2 |= INFO2_GENERATION_GT;
            h.generation = policy.generation;
        }
    }
    match policy.exists {
        RecordExistsAction::Update => {}
        RecordExistsAction::UpdateOnly => h.info3 |= INFO3_UPDATE_ONLY,
        RecordExistsAction::Replace => h.info3 |= INFO3_CREATE_OR_REPLACE,
        RecordExistsAction::ReplaceOnly => h.info3 |= INFO3_REPLACE_ONLY,
        RecordExistsAction::CreateOnly => h.info2 |= INFO2_CREATE_ONLY,
    }
    if policy.commit_level == CommitLevel::Master {
        h.info3 |= INFO3_COMMIT_MASTER;
    }
    if policy.durable_delete {
        h.info2 |= INFO2_DURABLE_DELETE;
    }
    h
}

fn apply_selection(h: &mut MsgHeader, bins: &BinSelection) -> Result<Vec<WireOp>> {
    match bins {
        BinSelection::All => {
            h.info1 |= INFO1_GET_ALL;
            Ok(Vec::new())
        }
        BinSelection::Header => {
            h.info1 |= INFO1_NOBINDATA;
            Ok(Vec::new())
        }
        BinSelection::Named(names) => names
            .iter()
            .map(|name| {
                check_bin_name(name)?;
                Ok(read_op(name))
            })
            .collect(),
    }
}

fn read_op(name: &str) -> WireOp {
    WireOp {
        op: OpKind::Read.code(),
        particle: ParticleType::Null as u8,
        name: name.to_string(),
        value: Vec::new(),
    }
}

/// Encode one operation. `ReadHeader` has no wire form and yields `None`.
pub fn encode_operation(op: &Operation) -> Result<Option<WireOp>> {
    op.validate()?;
    if op.kind == OpKind::ReadHeader {
        return Ok(None);
    }
    let mut buf = BytesMut::new();
    let particle = match &op.value {
        OpValue::None => ParticleType::Null,
        OpValue::Value(v) => {
            particle::validate_value(v)?;
            particle::encode_value(v, &mut buf)?;
            particle::particle_type(v)?
        }
        OpValue::Cdt(cdt) => {
            cdt.args.iter().try_for_each(particle::validate_value)?;
            particle::encode_cdt(cdt, &mut buf)?;
            ParticleType::Blob
        }
    };
    Ok(Some(WireOp {
        op: op.kind.code(),
        particle: particle as u8,
        name: op.bin.clone(),
        value: buf.to_vec(),
    }))
}

/// Read a record.
pub fn encode_read(key: &Key, bins: &BinSelection, policy: &ReadPolicy) -> Result<Bytes> {
    let mut header = read_header(policy);
    let ops = apply_selection(&mut header, bins)?;
    Ok(finish(&Message {
        header,
        fields: key_fields(key, policy.key),
        ops,
    }))
}

/// Check whether a record exists.
pub fn encode_exists(key: &Key, policy: &ReadPolicy) -> Result<Bytes> {
    encode_read(key, &BinSelection::Header, policy)
}

/// Write bins with the given single-bin operation (`Write`, `Append`,
/// `Prepend` or `Incr`).
pub fn encode_write(key: &Key, bins: &Bins, kind: OpKind, policy: &WritePolicy) -> Result<Bytes> {
    if bins.is_empty() {
        return Err(Error::parameter("no bins to write"));
    }
    let ops: Vec<Operation> = bins
        .iter()
        .map(|(name, value)| Operation {
            kind,
            bin: name.clone(),
            value: OpValue::Value(value.clone()),
        })
        .collect();
    let wire_ops = ops
        .iter()
        .map(encode_operation)
        .filter_map(Result::transpose)
        .collect::<Result<Vec<_>>>()?;
    Ok(finish(&Message {
        header: write_header(policy),
        fields: key_fields(key, policy.key),
        ops: wire_ops,
    }))
}

/// Delete a record.
pub fn encode_delete(key: &Key, policy: &WritePolicy) -> Result<Bytes> {
    let mut header = write_header(policy);
    header.info2 |= INFO2_DELETE;
    Ok(finish(&Message {
        header,
        fields: key_fields(key, policy.key),
        ops: Vec::new(),
    }))
}

/// Reset a record's TTL.
pub fn encode_touch(key: &Key, policy: &WritePolicy) -> Result<Bytes> {
    encode_operate(key, &[aerie_core::operations::touch()], policy)
}

/// Run several operations against one record, in order.
pub fn encode_operate(key: &Key, ops: &[Operation], policy: &WritePolicy) -> Result<Bytes> {
    if ops.is_empty() {
        return Err(Error::parameter("no operations"));
    }
    let mut header = write_header(policy);
    header.info2 &= !INFO2_WRITE;
    let mut wire_ops = Vec::with_capacity(ops.len());
    let mut respond_all = false;
    for op in ops {
        match op.kind {
            OpKind::Read if op.bin.is_empty() => header.info1 |= INFO1_READ | INFO1_GET_ALL,
            OpKind::Read | OpKind::CdtRead => header.info1 |= INFO1_READ,
            OpKind::ReadHeader => header.info1 |= INFO1_READ | INFO1_NOBINDATA,
            OpKind::Delete => header.info2 |= INFO2_WRITE | INFO2_DELETE,
            _ => header.info2 |= INFO2_WRITE,
        }
        if matches!(op.kind, OpKind::CdtRead | OpKind::CdtModify) {
            respond_all = true;
        }
        if let Some(w) = encode_operation(op)? {
            wire_ops.push(w);
        }
    }
    // A plain header read never combines with bin reads
    if header.info1 & INFO1_GET_ALL != 0 || wire_ops.iter().any(|o| o.op == OpKind::Read.code()) {
        header.info1 &= !INFO1_NOBINDATA;
    }
    if respond_all {
        header.info2 |= INFO2_RESPOND_ALL_OPS;
    }
    Ok(finish(&Message {
        header,
        fields: key_fields(key, policy.key),
        ops: wire_ops,
    }))
}

fn udf_fields(call: &UdfCall) -> Result<Vec<Field>> {
    call.args.iter().try_for_each(particle::validate_value)?;
    let mut args = BytesMut::new();
    particle::encode_list(&call.args, &mut args)?;
    Ok(vec![
        Field::string(field::UDF_PACKAGE, &call.module),
        Field::string(field::UDF_FUNCTION, &call.function),
        Field::new(field::UDF_ARGLIST, args.to_vec()),
    ])
}

/// Apply a UDF to one record.
pub fn encode_udf(key: &Key, call: &UdfCall, policy: &WritePolicy) -> Result<Bytes> {
    let mut fields = key_fields(key, policy.key);
    fields.extend(udf_fields(call)?);
    Ok(finish(&Message {
        header: write_header(policy),
        fields,
        ops: Vec::new(),
    }))
}

/// Batch read. Consecutive keys sharing namespace, set and bin selection
/// are sent with the repeat flag instead of repeating their fields.
pub fn encode_batch(keys: &[BatchKey<'_>], policy: &BatchPolicy) -> Result<Bytes> {
    let mut data = BytesMut::new();
    data.put_u32(keys.len() as u32);
    data.put_u8(1);
    let mut prev: Option<&BatchKey<'_>> = None;
    for entry in keys {
        data.put_u32(entry.index);
        data.put_slice(entry.key.digest());
        let repeat = prev.map_or(false, |p| {
            p.key.namespace() == entry.key.namespace()
                && p.key.set() == entry.key.set()
                && p.bins == entry.bins
        });
        if repeat {
            data.put_u8(1);
        } else {
            data.put_u8(0);
            let mut h = MsgHeader {
                info1: INFO1_READ,
                ..Default::default()
            };
            let ops = apply_selection(&mut h, entry.bins)?;
            let mut fields = vec![Field::string(field::NAMESPACE, entry.key.namespace())];
            if !entry.key.set().is_empty() {
                fields.push(Field::string(field::SET, entry.key.set()));
            }
            data.put_u8(h.info1);
            data.put_u16(fields.len() as u16);
            data.put_u16(ops.len() as u16);
            for f in &fields {
                f.encode(&mut data);
            }
            for op in &ops {
                op.encode(&mut data);
            }
        }
        prev = Some(entry);
    }
    let mut info1 = INFO1_READ | INFO1_BATCH;
    if policy.consistency_level == ConsistencyLevel::All {
        info1 |= INFO1_CONSISTENCY_ALL;
    }
    Ok(finish(&Message {
        header: MsgHeader {
            info1,
            timeout: timeout_ms(policy.base.timeout_ms),
            ..Default::default()
        },
        fields: vec![Field::new(field::BATCH_INDEX, data.to_vec())],
        ops: Vec::new(),
    }))
}

fn stream_fields(namespace: &str, set: Option<&str>, task_id: u64) -> Result<Vec<Field>> {
    aerie_core::limits::check_namespace(namespace)?;
    let mut fields = vec![Field::string(field::NAMESPACE, namespace)];
    if let Some(set) = set.filter(|s| !s.is_empty()) {
        aerie_core::limits::check_set(set)?;
        fields.push(Field::string(field::SET, set));
    }
    fields.push(Field::u64(field::TASK_ID, task_id));
    Ok(fields)
}

fn background_fields(call: &UdfCall) -> Result<Vec<Field>> {
    let mut fields = udf_fields(call)?;
    fields.push(Field::new(field::UDF_OP, vec![UDF_OP_BACKGROUND]));
    Ok(fields)
}

/// Scan a namespace or set, optionally running a UDF in the background.
pub fn encode_scan(
    namespace: &str,
    set: Option<&str>,
    params: &ScanParams,
    task_id: u64,
    socket_timeout_ms: u64,
    udf: Option<&UdfCall>,
) -> Result<Bytes> {
    if params.percent == 0 || params.percent > 100 {
        return Err(Error::parameter(format!(
            "scan percent must be 1..=100, got {}",
            params.percent
        )));
    }
    let mut header = MsgHeader::default();
    let mut fields = stream_fields(namespace, set, task_id)?;
    let mut options = params.priority.as_u8() << 4;
    if params.fail_on_cluster_change {
        options |= 0x08;
    }
    fields.push(Field::new(field::SCAN_OPTIONS, vec![options, params.percent]));
    if socket_timeout_ms > 0 {
        fields.push(Field::new(
            field::SCAN_TIMEOUT,
            timeout_ms(socket_timeout_ms).to_be_bytes().to_vec(),
        ));
    }
    let ops = match udf {
        Some(call) => {
            header.info2 = INFO2_WRITE;
            fields.extend(background_fields(call)?);
            Vec::new()
        }
        None => {
            header.info1 = INFO1_READ;
            apply_selection(&mut header, &params.bins)?
        }
    };
    Ok(finish(&Message {
        header,
        fields,
        ops,
    }))
}

/// Encode an INDEX_RANGE field for a filter.
///
/// ```text
/// count u8 (1) | name_len u8 | bin | particle u8 | begin_len u32 | begin | end_len u32 | end
/// ```
pub fn index_range_field(filter: &Filter) -> Result<Field> {
    check_bin_name(&filter.bin)?;
    let (particle, begin, end): (ParticleType, Vec<u8>, Vec<u8>) = match &filter.predicate {
        Predicate::Equal(Value::Int(i)) => (
            ParticleType::Integer,
            i.to_be_bytes().to_vec(),
            i.to_be_bytes().to_vec(),
        ),
        Predicate::Equal(Value::String(s)) => (
            ParticleType::String,
            s.as_bytes().to_vec(),
            s.as_bytes().to_vec(),
        ),
        Predicate::Equal(other) => {
            return Err(Error::parameter(format!(
                "filter value must be a string or integer, got {}",
                other.type_name()
            )))
        }
        Predicate::Range { begin, end } => (
            ParticleType::Integer,
            begin.to_be_bytes().to_vec(),
            end.to_be_bytes().to_vec(),
        ),
        Predicate::GeoWithin(region) | Predicate::GeoContains(region) => (
            ParticleType::GeoJson,
            region.as_bytes().to_vec(),
            region.as_bytes().to_vec(),
        ),
    };
    let mut data = BytesMut::new();
    data.put_u8(1);
    data.put_u8(filter.bin.len() as u8);
    data.put_slice(filter.bin.as_bytes());
    data.put_u8(particle as u8);
    data.put_u32(begin.len() as u32);
    data.put_slice(&begin);
    data.put_u32(end.len() as u32);
    data.put_slice(&end);
    Ok(Field::new(field::INDEX_RANGE, data.to_vec()))
}

/// Secondary-index query, optionally running a UDF in the background.
#[allow(clippy::too_many_arguments)]
pub fn encode_query(
    namespace: &str,
    set: Option<&str>,
    index_name: Option<&str>,
    filter: &Filter,
    bins: &BinSelection,
    task_id: u64,
    socket_timeout_ms: u64,
    udf: Option<&UdfCall>,
) -> Result<Bytes> {
    let mut header = MsgHeader::default();
    let mut fields = stream_fields(namespace, set, task_id)?;
    if let Some(name) = index_name {
        if name.len() > MAX_INDEX_NAME_LEN {
            return Err(Error::parameter(format!("index name '{}' too long", name)));
        }
        fields.push(Field::string(field::INDEX_NAME, name));
    }
    fields.push(index_range_field(filter)?);
    if filter.index_type != IndexType::Default {
        fields.push(Field::new(field::INDEX_TYPE, vec![filter.index_type.as_u8()]));
    }
    if socket_timeout_ms > 0 {
        fields.push(Field::new(
            field::SCAN_TIMEOUT,
            timeout_ms(socket_timeout_ms).to_be_bytes().to_vec(),
        ));
    }
    match udf {
        Some(call) => {
            header.info2 = INFO2_WRITE;
            fields.extend(background_fields(call)?);
        }
        None => {
            header.info1 = INFO1_READ;
            match bins {
                BinSelection::All => header.info1 |= INFO1_GET_ALL,
                BinSelection::Header => header.info1 |= INFO1_NOBINDATA,
                BinSelection::Named(names) => {
                    let mut data = BytesMut::new();
                    data.put_u8(names.len() as u8);
                    for name in names {
                        check_bin_name(name)?;
                        data.put_u8(name.len() as u8);
                        data.put_slice(name.as_bytes());
                    }
                    fields.push(Field::new(field::QUERY_BINLIST, data.to_vec()));
                }
            }
        }
    }
    Ok(finish(&Message {
        header,
        fields,
        ops: Vec::new(),
    }))
}

// ============================================================================
// Request-side decoding
// ============================================================================

/// Decode a wire operation into an [`Operation`].
pub fn decode_operation(op: &WireOp) -> Result<Operation> {
    let kind = OpKind::from_code(op.op)
        .ok_or_else(|| Error::protocol(format!("unknown operation code {}", op.op)))?;
    let value = match kind {
        OpKind::CdtRead | OpKind::CdtModify => OpValue::Cdt(particle::decode_cdt(&op.value)?),
        OpKind::Read | OpKind::Touch | OpKind::Delete => OpValue::None,
        _ => OpValue::Value(particle::decode_value(op.particle, &op.value)?),
    };
    Ok(Operation {
        kind,
        bin: op.name.clone(),
        value,
    })
}

/// One decoded batch entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    /// Position in the caller's key list
    pub index: u32,
    /// Record digest
    pub digest: Digest,
    /// Namespace
    pub namespace: String,
    /// Set (may be empty)
    pub set: String,
    /// Bins requested
    pub bins: BinSelection,
}

/// Parse a BATCH_INDEX field.
pub fn decode_batch_index(data: &[u8]) -> Result<Vec<BatchEntry>> {
    let mut r = Reader::new(data);
    let count = r.u32()? as usize;
    let _inline = r.u8()?;
    let mut out: Vec<BatchEntry> = Vec::with_capacity(count.min(data.len() / 25));
    for _ in 0..count {
        let index = r.u32()?;
        let mut digest = [0u8; 20];
        digest.copy_from_slice(r.take(20)?);
        let repeat = r.u8()?;
        let entry = if repeat == 1 {
            let prev = out
                .last()
                .ok_or_else(|| Error::protocol("batch repeat flag on first entry"))?;
            BatchEntry {
                index,
                digest,
                ..prev.clone()
            }
        } else {
            let info1 = r.u8()?;
            let n_fields = r.u16()?;
            let n_ops = r.u16()?;
            let mut namespace = String::new();
            let mut set = String::new();
            for _ in 0..n_fields {
                let size = r.u32()? as usize;
                if size == 0 {
                    return Err(Error::protocol("zero-length batch field"));
                }
                let kind = r.u8()?;
                let data = r.take(size - 1)?;
                let text = std::str::from_utf8(data)
                    .map_err(|e| Error::protocol(format!("batch field is not UTF-8: {}", e)))?;
                match kind {
                    field::NAMESPACE => namespace = text.to_string(),
                    field::SET => set = text.to_string(),
                    _ => {}
                }
            }
            let mut names = Vec::with_capacity(n_ops as usize);
            for _ in 0..n_ops {
                let size = r.u32()? as usize;
                let body = r.take(size)?;
                if body.len() < 4 || body.len() < 4 + body[3] as usize {
                    return Err(Error::protocol("malformed batch operation"));
                }
                let name = std::str::from_utf8(&body[4..4 + body[3] as usize])
                    .map_err(|e| Error::protocol(format!("bin name is not UTF-8: {}", e)))?;
                names.push(name.to_string());
            }
            let bins = if info1 & INFO1_NOBINDATA != 0 {
                BinSelection::Header
            } else if info1 & INFO1_GET_ALL != 0 {
                BinSelection::All
            } else {
                BinSelection::Named(names)
            };
            BatchEntry {
                index,
                digest,
                namespace,
                set,
                bins,
            }
        };
        out.push(entry);
    }
    Ok(out)
}

/// Parse an INDEX_RANGE field (plus the optional INDEX_TYPE) into a filter.
pub fn decode_index_range(data: &[u8], index_type: IndexType) -> Result<Filter> {
    let mut r = Reader::new(data);
    let count = r.u8()?;
    if count != 1 {
        return Err(Error::protocol(format!("expected one index range, got {}", count)));
    }
    let name_len = r.u8()? as usize;
    let bin = std::str::from_utf8(r.take(name_len)?)
        .map_err(|e| Error::protocol(format!("bin name is not UTF-8: {}", e)))?
        .to_string();
    let tag = r.u8()?;
    let begin_len = r.u32()? as usize;
    let begin = r.take(begin_len)?;
    let end_len = r.u32()? as usize;
    let end = r.take(end_len)?;
    let as_int = |b: &[u8]| -> Result<i64> {
        let arr: [u8; 8] = b
            .try_into()
            .map_err(|_| Error::protocol("integer range bound must be 8 bytes"))?;
        Ok(i64::from_be_bytes(arr))
    };
    let as_text = |b: &[u8]| -> Result<String> {
        String::from_utf8(b.to_vec()).map_err(|e| Error::protocol(format!("invalid UTF-8: {}", e)))
    };
    let predicate = match ParticleType::from_u8(tag) {
        Some(ParticleType::Integer) => {
            let (b, e) = (as_int(begin)?, as_int(end)?);
            if b == e {
                Predicate::Equal(Value::Int(b))
            } else {
                Predicate::Range { begin: b, end: e }
            }
        }
        Some(ParticleType::String) => Predicate::Equal(Value::String(as_text(begin)?)),
        Some(ParticleType::GeoJson) => Predicate::GeoWithin(as_text(begin)?),
        _ => return Err(Error::protocol(format!("unsupported index range type {}", tag))),
    };
    Ok(Filter {
        bin,
        index_type,
        predicate,
    })
}

/// Parse a QUERY_BINLIST field.
pub fn decode_bin_list(data: &[u8]) -> Result<Vec<String>> {
    let mut r = Reader::new(data);
    let count = r.u8()?;
    (0..count)
        .map(|_| {
            let len = r.u8()? as usize;
            std::str::from_utf8(r.take(len)?)
                .map(str::to_string)
                .map_err(|e| Error::protocol(format!("bin name is not UTF-8: {}", e)))
        })
        .collect()
}

/// Parse a UDF_ARGLIST field.
pub fn decode_udf_args(data: &[u8]) -> Result<Vec<Value>> {
    let mut r = Reader::new(data);
    particle::decode_list(&mut r)
}

/// Parse a KEY field.
pub fn decode_user_key(data: &[u8]) -> Result<UserKey> {
    let (&tag, rest) = data
        .split_first()
        .ok_or_else(|| Error::protocol("empty key field"))?;
    let value = particle::decode_value(tag, rest)?;
    UserKey::try_from_value(value).map_err(|e| Error::protocol(e.to_string()))
}
