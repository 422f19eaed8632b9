//! Protocol framing
//!
//! Every request and response is a frame: an 8-byte proto header followed
//! by `length` payload bytes.
//!
//! ```text
//! ┌─────────────┬──────────┬───────────────────────────┐
//! │ Version (1) │ Type (1) │ Length (6, big-endian)    │
//! └─────────────┴──────────┴───────────────────────────┘
//! ```

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use aerie_core::{Error, Result};

/// Protocol version carried in every frame.
pub const PROTO_VERSION: u8 = 2;

/// Size of the proto header in bytes.
pub const PROTO_HEADER_SIZE: usize = 8;

/// Largest payload a decoder accepts.
pub const MAX_FRAME_LEN: usize = 128 * 1024 * 1024;

/// Frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtoType {
    /// Line-oriented info protocol
    Info = 1,
    /// Security/administration commands
    Admin = 2,
    /// Record protocol message(s)
    Message = 3,
}

impl ProtoType {
    /// Parse a type byte.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(ProtoType::Info),
            2 => Some(ProtoType::Admin),
            3 => Some(ProtoType::Message),
            _ => None,
        }
    }
}

/// Decoded proto header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoHeader {
    /// Frame type
    pub kind: ProtoType,
    /// Payload length
    pub length: usize,
}

impl ProtoHeader {
    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; PROTO_HEADER_SIZE] {
        let word = ((PROTO_VERSION as u64) << 56)
            | ((self.kind as u64) << 48)
            | (self.length as u64 & 0xFFFF_FFFF_FFFF);
        word.to_be_bytes()
    }

    /// Parse and validate a header.
    #[track_caller]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PROTO_HEADER_SIZE {
            return Err(Error::protocol("short proto header"));
        }
        let word = BigEndian::read_u64(bytes);
        let version = (word >> 56) as u8;
        if version != PROTO_VERSION {
            return Err(Error::protocol(format!(
                "unsupported proto version {}",
                version
            )));
        }
        let type_byte = (word >> 48) as u8;
        let kind = ProtoType::from_u8(type_byte)
            .ok_or_else(|| Error::protocol(format!("unknown proto type {}", type_byte)))?;
        let length = (word & 0xFFFF_FFFF_FFFF) as usize;
        if length > MAX_FRAME_LEN {
            return Err(Error::protocol(format!(
                "frame length {} exceeds limit {}",
                length, MAX_FRAME_LEN
            )));
        }
        Ok(ProtoHeader { kind, length })
    }
}

/// A complete frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame type
    pub kind: ProtoType,
    /// Payload, without the proto header
    pub payload: Bytes,
}

impl Frame {
    /// Frame with the given payload.
    pub fn new(kind: ProtoType, payload: impl Into<Bytes>) -> Self {
        Frame {
            kind,
            payload: payload.into(),
        }
    }

    /// Serialize header and payload.
    pub fn encode(&self, out: &mut BytesMut) {
        let header = ProtoHeader {
            kind: self.kind,
            length: self.payload.len(),
        };
        out.reserve(PROTO_HEADER_SIZE + self.payload.len());
        out.put_slice(&header.to_bytes());
        out.put_slice(&self.payload);
    }

    /// Serialize to a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(PROTO_HEADER_SIZE + self.payload.len());
        self.encode(&mut out);
        out.freeze()
    }
}

/// Start a frame in `out`, returning the offset to pass to [`finish_frame`].
///
/// Lets encoders write the payload in place instead of building it in a
/// separate buffer.
pub fn begin_frame(out: &mut BytesMut) -> usize {
    let at = out.len();
    out.put_bytes(0, PROTO_HEADER_SIZE);
    at
}

/// Fill in the header of a frame started with [`begin_frame`].
pub fn finish_frame(out: &mut BytesMut, at: usize, kind: ProtoType) {
    let header = ProtoHeader {
        kind,
        length: out.len() - at - PROTO_HEADER_SIZE,
    };
    out[at..at + PROTO_HEADER_SIZE].copy_from_slice(&header.to_bytes());
}

/// Incremental frame decoder.
///
/// Feed it the socket read buffer; it returns `Ok(None)` until a whole
/// frame is buffered and never consumes a partial frame.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    header: Option<ProtoHeader>,
}

impl FrameDecoder {
    /// Fresh decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to split one frame off the front of `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        let header = match self.header {
            Some(h) => h,
            None => {
                if buf.len() < PROTO_HEADER_SIZE {
                    return Ok(None);
                }
                let h = ProtoHeader::from_bytes(&buf[..PROTO_HEADER_SIZE])?;
                let _ = buf.split_to(PROTO_HEADER_SIZE);
                self.header = Some(h);
                h
            }
        };
        if buf.len() < header.length {
            buf.reserve(header.length - buf.len());
            return Ok(None);
        }
        self.header = None;
        let payload = buf.split_to(header.length).freeze();
        Ok(Some(Frame {
            kind: header.kind,
            payload,
        }))
    }
}
