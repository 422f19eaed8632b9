//! Value (particle) encoding
//!
//! Every value travels as a particle: a one-byte type tag plus a payload
//! whose length is carried by the enclosing structure (an operation, a
//! field, or a nested element header).
//!
//! ```text
//! INTEGER  i64 big-endian (8 bytes)
//! FLOAT    f64 bits big-endian (8 bytes)
//! STRING   UTF-8 bytes
//! BLOB     raw bytes
//! GEOJSON  flags u8 (0) | ncells u16 (0) | JSON text
//! LIST     count u32 | element*
//! MAP      order u8 | count u32 | (key element, value element)*
//!
//! element: tag u8 | len u32 | payload
//! ```

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};

use aerie_core::operations::CdtOp;
use aerie_core::{Error, MapOrder, MapValue, ParticleType, Result, Value};

/// Nesting depth accepted when decoding lists and maps.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Bounds-checked reader over a byte slice.
///
/// Every read past the end is a `Protocol` error, never a panic.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Current offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Consume `n` bytes.
    #[track_caller]
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::protocol(format!(
                "truncated input: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Read one byte.
    #[track_caller]
    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a big-endian u16.
    #[track_caller]
    pub fn u16(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    /// Read a big-endian u32.
    #[track_caller]
    pub fn u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    /// Read a big-endian u64.
    #[track_caller]
    pub fn u64(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }
}

/// Reject values that cannot be sent, before anything is encoded.
#[track_caller]
pub fn validate_value(value: &Value) -> Result<()> {
    match value {
        Value::Bool(_) => Err(Error::parameter(
            "boolean values are not supported by the record protocol",
        )),
        Value::List(items) => items.iter().try_for_each(validate_value),
        Value::Map(map) => {
            for (k, v) in &map.entries {
                if !k.is_scalar() {
                    return Err(Error::parameter(format!(
                        "map keys must be integer, float, string or bytes, got {}",
                        k.type_name()
                    )));
                }
                validate_value(v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Particle tag for a value. `Bool` is a `Parameter` error.
#[track_caller]
pub fn particle_type(value: &Value) -> Result<ParticleType> {
    value
        .particle_type()
        .ok_or_else(|| Error::parameter("boolean values are not supported by the record protocol"))
}

/// Append the payload of `value` (without its tag) to `out`.
#[track_caller]
pub fn encode_value(value: &Value, out: &mut BytesMut) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Bool(_) => {
            return Err(Error::parameter(
                "boolean values are not supported by the record protocol",
            ))
        }
        Value::Int(i) => out.put_i64(*i),
        Value::Float(f) => out.put_u64(f.to_bits()),
        Value::String(s) => out.put_slice(s.as_bytes()),
        Value::Bytes(b) => out.put_slice(b),
        Value::GeoJson(s) => {
            out.put_u8(0);
            out.put_u16(0);
            out.put_slice(s.as_bytes());
        }
        Value::List(items) => encode_list(items, out)?,
        Value::Map(map) => {
            out.put_u8(map.order.flag());
            out.put_u32(map.entries.len() as u32);
            for (k, v) in &map.entries {
                if !k.is_scalar() {
                    return Err(Error::parameter(format!(
                        "map keys must be integer, float, string or bytes, got {}",
                        k.type_name()
                    )));
                }
                encode_element(k, out)?;
                encode_element(v, out)?;
            }
        }
    }
    Ok(())
}

/// Encode a list payload: count then elements.
#[track_caller]
pub fn encode_list(items: &[Value], out: &mut BytesMut) -> Result<()> {
    out.put_u32(items.len() as u32);
    for item in items {
        encode_element(item, out)?;
    }
    Ok(())
}

/// Encode a nested element: tag, length, payload.
#[track_caller]
pub fn encode_element(value: &Value, out: &mut BytesMut) -> Result<()> {
    out.put_u8(particle_type(value)? as u8);
    let len_at = out.len();
    out.put_u32(0);
    encode_value(value, out)?;
    let len = (out.len() - len_at - 4) as u32;
    BigEndian::write_u32(&mut out[len_at..len_at + 4], len);
    Ok(())
}

/// Decode a payload with the given tag.
#[track_caller]
pub fn decode_value(tag: u8, payload: &[u8]) -> Result<Value> {
    decode_at_depth(tag, payload, 0)
}

fn decode_at_depth(tag: u8, payload: &[u8], depth: usize) -> Result<Value> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::protocol("value nesting too deep"));
    }
    let ptype = ParticleType::from_u8(tag)
        .ok_or_else(|| Error::protocol(format!("unknown particle type {}", tag)))?;
    Ok(match ptype {
        ParticleType::Null => Value::Null,
        ParticleType::Integer => {
            let mut r = Reader::new(payload);
            let v = r.u64()? as i64;
            expect_consumed(&r)?;
            Value::Int(v)
        }
        ParticleType::Float => {
            let mut r = Reader::new(payload);
            let v = f64::from_bits(r.u64()?);
            expect_consumed(&r)?;
            Value::Float(v)
        }
        ParticleType::String => Value::String(utf8(payload)?),
        ParticleType::Blob => Value::Bytes(payload.to_vec()),
        ParticleType::GeoJson => {
            let mut r = Reader::new(payload);
            let _flags = r.u8()?;
            let ncells = r.u16()? as usize;
            r.take(ncells * 8)?;
            Value::GeoJson(utf8(r.take(r.remaining())?)?)
        }
        ParticleType::List => {
            let mut r = Reader::new(payload);
            let items = decode_list_at(&mut r, depth)?;
            expect_consumed(&r)?;
            Value::List(items)
        }
        ParticleType::Map => {
            let mut r = Reader::new(payload);
            let flag = r.u8()?;
            let order = MapOrder::from_flag(flag)
                .ok_or_else(|| Error::protocol(format!("unknown map order flag {}", flag)))?;
            let count = r.u32()? as usize;
            let mut entries = Vec::with_capacity(count.min(r.remaining() / 10));
            for _ in 0..count {
                let k = decode_element(&mut r, depth + 1)?;
                let v = decode_element(&mut r, depth + 1)?;
                entries.push((k, v));
            }
            expect_consumed(&r)?;
            Value::Map(MapValue { order, entries })
        }
    })
}

fn decode_list_at(r: &mut Reader<'_>, depth: usize) -> Result<Vec<Value>> {
    let count = r.u32()? as usize;
    // Each element needs at least 5 bytes of header
    let mut items = Vec::with_capacity(count.min(r.remaining() / 5));
    for _ in 0..count {
        items.push(decode_element(r, depth + 1)?);
    }
    Ok(items)
}

/// Decode a list payload (count then elements) from a reader.
#[track_caller]
pub fn decode_list(r: &mut Reader<'_>) -> Result<Vec<Value>> {
    decode_list_at(r, 0)
}

fn decode_element(r: &mut Reader<'_>, depth: usize) -> Result<Value> {
    let tag = r.u8()?;
    let len = r.u32()? as usize;
    let payload = r.take(len)?;
    decode_at_depth(tag, payload, depth)
}

fn expect_consumed(r: &Reader<'_>) -> Result<()> {
    if r.remaining() != 0 {
        return Err(Error::protocol(format!(
            "{} trailing bytes after value",
            r.remaining()
        )));
    }
    Ok(())
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| Error::protocol(format!("invalid UTF-8: {}", e)))
}

/// Encode a collection operation: code, then its arguments as a list.
#[track_caller]
pub fn encode_cdt(op: &CdtOp, out: &mut BytesMut) -> Result<()> {
    out.put_u8(op.code);
    encode_list(&op.args, out)
}

/// Decode a collection operation payload.
#[track_caller]
pub fn decode_cdt(payload: &[u8]) -> Result<CdtOp> {
    let mut r = Reader::new(payload);
    let code = r.u8()?;
    let args = decode_list(&mut r)?;
    expect_consumed(&r)?;
    Ok(CdtOp { code, args })
}
