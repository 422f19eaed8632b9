//! Record protocol message layout
//!
//! A message frame payload holds one or more messages. Streaming responses
//! (batch, scan, query) pack several messages per frame and end with a
//! message carrying [`INFO3_LAST`].
//!
//! ```text
//! Message header (22 bytes)
//! ┌────────┬───────┬───────┬───────┬────────┬─────────┬────────────┬────────────┬──────────────┬──────────┬───────┐
//! │ hsz(1) │ i1(1) │ i2(1) │ i3(1) │ unused │ rc(1)   │ gen(4)     │ expire(4)  │ timeout(4)   │ nfld(2)  │ nop(2)│
//! └────────┴───────┴───────┴───────┴────────┴─────────┴────────────┴────────────┴──────────────┴──────────┴───────┘
//!
//! Field:     size u32 (type byte + data) | type u8 | data
//! Operation: size u32 (4 + name + value) | op u8 | particle u8 | version u8 | name_len u8 | name | value
//! ```

use bytes::{BufMut, BytesMut};

use aerie_core::limits::MAX_BIN_NAME_LEN;
use aerie_core::{Error, Result};

use crate::particle::Reader;

/// Size of the message header in bytes.
pub const MSG_HEADER_SIZE: usize = 22;

// info1
/// Read the record.
pub const INFO1_READ: u8 = 1;
/// Read all bins.
pub const INFO1_GET_ALL: u8 = 1 << 1;
/// Batch request.
pub const INFO1_BATCH: u8 = 1 << 3;
/// Do not return bin data.
pub const INFO1_NOBINDATA: u8 = 1 << 5;
/// Read from all replicas.
pub const INFO1_CONSISTENCY_ALL: u8 = 1 << 6;

// info2
/// Write the record.
pub const INFO2_WRITE: u8 = 1;
/// Delete the record.
pub const INFO2_DELETE: u8 = 1 << 1;
/// Generation must equal the expected one.
pub const INFO2_GENERATION: u8 = 1 << 2;
/// Generation must be less than the expected one.
pub const INFO2_GENERATION_GT: u8 = 1 << 3;
/// Leave a tombstone.
pub const INFO2_DURABLE_DELETE: u8 = 1 << 4;
/// Fail if the record exists.
pub const INFO2_CREATE_ONLY: u8 = 1 << 5;
/// Return a result for every operation.
pub const INFO2_RESPOND_ALL_OPS: u8 = 1 << 7;

// info3
/// Last message of a stream.
pub const INFO3_LAST: u8 = 1;
/// Acknowledge after the master commits.
pub const INFO3_COMMIT_MASTER: u8 = 1 << 1;
/// Fail if the record does not exist.
pub const INFO3_UPDATE_ONLY: u8 = 1 << 3;
/// Create or replace all bins.
pub const INFO3_CREATE_OR_REPLACE: u8 = 1 << 4;
/// Replace all bins, fail if the record does not exist.
pub const INFO3_REPLACE_ONLY: u8 = 1 << 5;

/// Field type codes.
#[allow(missing_docs)]
pub mod field {
    pub const NAMESPACE: u8 = 0;
    pub const SET: u8 = 1;
    pub const KEY: u8 = 2;
    pub const DIGEST: u8 = 4;
    pub const TASK_ID: u8 = 7;
    pub const SCAN_OPTIONS: u8 = 8;
    pub const SCAN_TIMEOUT: u8 = 9;
    pub const INDEX_NAME: u8 = 21;
    pub const INDEX_RANGE: u8 = 22;
    pub const INDEX_TYPE: u8 = 26;
    pub const UDF_PACKAGE: u8 = 30;
    pub const UDF_FUNCTION: u8 = 31;
    pub const UDF_ARGLIST: u8 = 32;
    pub const UDF_OP: u8 = 33;
    pub const QUERY_BINLIST: u8 = 40;
    pub const BATCH_INDEX: u8 = 41;
    /// Record last-update time, u64 milliseconds since the epoch
    pub const LAST_UPDATE_TIME: u8 = 60;
}

/// Message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgHeader {
    /// Read flags
    pub info1: u8,
    /// Write flags
    pub info2: u8,
    /// Misc flags
    pub info3: u8,
    /// Result code (responses)
    pub result_code: u8,
    /// Generation (expected on requests, current on responses)
    pub generation: u32,
    /// TTL on requests, void-time on responses
    pub expiration: u32,
    /// Server-side timeout on requests, batch index on batch responses
    pub timeout: u32,
    /// Number of fields that follow
    pub n_fields: u16,
    /// Number of operations that follow
    pub n_ops: u16,
}

impl MsgHeader {
    /// Serialize header to bytes.
    pub fn encode(&self, out: &mut BytesMut) {
        out.put_u8(MSG_HEADER_SIZE as u8);
        out.put_u8(self.info1);
        out.put_u8(self.info2);
        out.put_u8(self.info3);
        out.put_u8(0);
        out.put_u8(self.result_code);
        out.put_u32(self.generation);
        out.put_u32(self.expiration);
        out.put_u32(self.timeout);
        out.put_u16(self.n_fields);
        out.put_u16(self.n_ops);
    }

    /// Parse a header.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let header_sz = r.u8()? as usize;
        if header_sz != MSG_HEADER_SIZE {
            return Err(Error::protocol(format!(
                "unexpected message header size {}",
                header_sz
            )));
        }
        let info1 = r.u8()?;
        let info2 = r.u8()?;
        let info3 = r.u8()?;
        let _unused = r.u8()?;
        Ok(MsgHeader {
            info1,
            info2,
            info3,
            result_code: r.u8()?,
            generation: r.u32()?,
            expiration: r.u32()?,
            timeout: r.u32()?,
            n_fields: r.u16()?,
            n_ops: r.u16()?,
        })
    }

    /// True on the final message of a stream.
    pub fn is_last(&self) -> bool {
        self.info3 & INFO3_LAST != 0
    }
}

/// A message field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field type code
    pub kind: u8,
    /// Field data
    pub data: Vec<u8>,
}

impl Field {
    /// Field from raw data.
    pub fn new(kind: u8, data: impl Into<Vec<u8>>) -> Self {
        Field {
            kind,
            data: data.into(),
        }
    }

    /// Field holding a string.
    pub fn string(kind: u8, s: &str) -> Self {
        Field::new(kind, s.as_bytes())
    }

    /// Field holding a big-endian u64.
    pub fn u64(kind: u8, v: u64) -> Self {
        Field::new(kind, v.to_be_bytes())
    }

    pub(crate) fn encode(&self, out: &mut BytesMut) {
        out.put_u32(self.data.len() as u32 + 1);
        out.put_u8(self.kind);
        out.put_slice(&self.data);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let size = r.u32()? as usize;
        if size == 0 {
            return Err(Error::protocol("zero-length field"));
        }
        let kind = r.u8()?;
        let data = r.take(size - 1)?.to_vec();
        Ok(Field { kind, data })
    }

    /// Data as UTF-8.
    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.data)
            .map_err(|e| Error::protocol(format!("field {} is not UTF-8: {}", self.kind, e)))
    }
}

/// A raw operation as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireOp {
    /// Operation code
    pub op: u8,
    /// Particle type of `value`
    pub particle: u8,
    /// Bin name
    pub name: String,
    /// Encoded value
    pub value: Vec<u8>,
}

impl WireOp {
    pub(crate) fn encode(&self, out: &mut BytesMut) {
        out.put_u32((4 + self.name.len() + self.value.len()) as u32);
        out.put_u8(self.op);
        out.put_u8(self.particle);
        out.put_u8(0);
        out.put_u8(self.name.len() as u8);
        out.put_slice(self.name.as_bytes());
        out.put_slice(&self.value);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let size = r.u32()? as usize;
        if size < 4 {
            return Err(Error::protocol(format!("operation size {} too small", size)));
        }
        let op = r.u8()?;
        let particle = r.u8()?;
        let _version = r.u8()?;
        let name_len = r.u8()? as usize;
        if name_len > MAX_BIN_NAME_LEN || name_len > size - 4 {
            return Err(Error::protocol(format!("invalid bin name length {}", name_len)));
        }
        let name = std::str::from_utf8(r.take(name_len)?)
            .map_err(|e| Error::protocol(format!("bin name is not UTF-8: {}", e)))?
            .to_string();
        let value = r.take(size - 4 - name_len)?.to_vec();
        Ok(WireOp {
            op,
            particle,
            name,
            value,
        })
    }
}

/// One message: header, fields and operations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Header; `n_fields` and `n_ops` are filled in on encode
    pub header: MsgHeader,
    /// Fields
    pub fields: Vec<Field>,
    /// Operations
    pub ops: Vec<WireOp>,
}

impl Message {
    /// Append the encoded message to `out`.
    pub fn encode(&self, out: &mut BytesMut) {
        let header = MsgHeader {
            n_fields: self.fields.len() as u16,
            n_ops: self.ops.len() as u16,
            ..self.header
        };
        header.encode(out);
        for f in &self.fields {
            f.encode(out);
        }
        for op in &self.ops {
            op.encode(out);
        }
    }

    /// Decode one message from the reader.
    pub fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let header = MsgHeader::decode(r)?;
        let mut fields = Vec::with_capacity(header.n_fields as usize);
        for _ in 0..header.n_fields {
            fields.push(Field::decode(r)?);
        }
        let mut ops = Vec::with_capacity(header.n_ops as usize);
        for _ in 0..header.n_ops {
            ops.push(WireOp::decode(r)?);
        }
        Ok(Message {
            header,
            fields,
            ops,
        })
    }

    /// Decode every message in a frame payload.
    pub fn decode_all(payload: &[u8]) -> Result<Vec<Message>> {
        let mut r = Reader::new(payload);
        let mut out = Vec::new();
        while r.remaining() > 0 {
            out.push(Message::decode(&mut r)?);
        }
        Ok(out)
    }

    /// First field of the given type.
    pub fn field(&self, kind: u8) -> Option<&Field> {
        self.fields.iter().find(|f| f.kind == kind)
    }
}
