//! Response decoding
//!
//! Single-record commands get exactly one message back. Batch, scan and
//! query responses are streams of messages, possibly spread over several
//! frames, terminated by a message with `INFO3_LAST`.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};

use aerie_core::{
    Bins, Digest, Error, Key, Metadata, OpKind, Result, ResultCode, UserKey, Value,
    TTL_NEVER_EXPIRE,
};

use crate::command::decode_user_key;
use crate::message::{field, Message, WireOp};
use crate::particle;
use crate::proto::{begin_frame, finish_frame, ProtoType};

/// Seconds between the Unix epoch and 2010-01-01T00:00:00Z, the origin of
/// server void-times.
pub const CITRUSLEAF_EPOCH: u64 = 1_262_304_000;

/// Current time in seconds since [`CITRUSLEAF_EPOCH`].
pub fn citrusleaf_now() -> u32 {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(CITRUSLEAF_EPOCH);
    unix.saturating_sub(CITRUSLEAF_EPOCH) as u32
}

/// Convert a server void-time into a TTL in seconds.
///
/// A void-time of 0 means the record never expires. A record whose
/// void-time has already passed reports a TTL of 1 second.
pub fn void_time_to_ttl(void_time: u32) -> i32 {
    if void_time == 0 {
        return TTL_NEVER_EXPIRE;
    }
    let now = citrusleaf_now();
    if void_time > now {
        (void_time - now).min(i32::MAX as u32) as i32
    } else {
        1
    }
}

/// One decoded response message.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Status
    pub result_code: ResultCode,
    /// Final message of a stream
    pub last: bool,
    /// Batch index (batch responses only)
    pub batch_index: u32,
    /// Record metadata
    pub metadata: Metadata,
    /// Namespace (stream responses)
    pub namespace: Option<String>,
    /// Set (stream responses)
    pub set: Option<String>,
    /// Digest (stream responses)
    pub digest: Option<Digest>,
    /// User key, when stored with the record
    pub user_key: Option<UserKey>,
    /// Bin values; later operations on the same bin win
    pub bins: Bins,
}

impl Response {
    /// Convert a decoded message.
    pub fn from_message(msg: &Message) -> Result<Self> {
        let h = &msg.header;
        let mut namespace = None;
        let mut set = None;
        let mut digest = None;
        let mut user_key = None;
        let mut last_update_time = 0;
        for f in &msg.fields {
            match f.kind {
                field::NAMESPACE => namespace = Some(f.as_str()?.to_string()),
                field::SET => set = Some(f.as_str()?.to_string()),
                field::DIGEST => {
                    let d: Digest = f
                        .data
                        .as_slice()
                        .try_into()
                        .map_err(|_| Error::protocol("digest field must be 20 bytes"))?;
                    digest = Some(d);
                }
                field::KEY => user_key = Some(decode_user_key(&f.data)?),
                field::LAST_UPDATE_TIME => {
                    let arr: [u8; 8] = f
                        .data
                        .as_slice()
                        .try_into()
                        .map_err(|_| Error::protocol("last-update-time field must be 8 bytes"))?;
                    last_update_time = u64::from_be_bytes(arr);
                }
                _ => {}
            }
        }
        let mut bins = Bins::new();
        for op in &msg.ops {
            let value = particle::decode_value(op.particle, &op.value)?;
            bins.insert(op.name.clone(), value);
        }
        Ok(Response {
            result_code: ResultCode::from(h.result_code),
            last: h.is_last(),
            batch_index: h.timeout,
            metadata: Metadata {
                generation: h.generation,
                ttl: void_time_to_ttl(h.expiration),
                last_update_time,
            },
            namespace,
            set,
            digest,
            user_key,
            bins,
        })
    }

    /// Reconstruct the record key of a stream response.
    pub fn key(&self) -> Result<Key> {
        let namespace = self
            .namespace
            .as_deref()
            .ok_or_else(|| Error::protocol("stream record without namespace"))?;
        let digest = self
            .digest
            .ok_or_else(|| Error::protocol("stream record without digest"))?;
        let key = Key::with_digest(namespace, self.set.as_deref().unwrap_or(""), digest)
            .map_err(|e| Error::protocol(e.to_string()))?;
        Ok(match &self.user_key {
            Some(k) => key.with_user_key(k.clone()),
            None => key,
        })
    }

    /// `Err` for any status other than `Ok`.
    pub fn into_result(self) -> Result<Self> {
        if self.result_code.is_ok() {
            Ok(self)
        } else {
            Err(Error::from_code(self.result_code))
        }
    }
}

/// Decode a single-record response payload.
pub fn decode_response(payload: &[u8]) -> Result<Response> {
    let mut msgs = Message::decode_all(payload)?;
    if msgs.len() != 1 {
        return Err(Error::protocol(format!(
            "expected one response message, got {}",
            msgs.len()
        )));
    }
    Response::from_message(&msgs.remove(0))
}

/// Decode every message of one stream frame payload.
pub fn decode_stream(payload: &[u8]) -> Result<Vec<Response>> {
    Message::decode_all(payload)?
        .iter()
        .map(Response::from_message)
        .collect()
}

/// A response operation carrying one bin value.
pub fn bin_op(name: &str, value: &Value) -> Result<WireOp> {
    let mut buf = BytesMut::new();
    particle::encode_value(value, &mut buf)?;
    Ok(WireOp {
        op: OpKind::Read.code(),
        particle: particle::particle_type(value)? as u8,
        name: name.to_string(),
        value: buf.to_vec(),
    })
}

/// Pack response messages into a single message frame.
pub fn encode_messages(msgs: &[Message]) -> Bytes {
    let mut out = BytesMut::with_capacity(256);
    let at = begin_frame(&mut out);
    for m in msgs {
        m.encode(&mut out);
    }
    finish_frame(&mut out, at, ProtoType::Message);
    out.freeze()
}

/// True for statuses that end a stream without error.
pub fn is_stream_end(code: ResultCode) -> bool {
    matches!(
        code,
        ResultCode::Ok | ResultCode::RecordNotFound | ResultCode::QueryEnd | ResultCode::NoMoreRecords
    )
}
