//! Admin protocol: connection authentication
//!
//! ```text
//! Admin header (16 bytes, after the proto header)
//! ┌──────────┬────────────┬─────────────┬────────────────┬──────────────┐
//! │ 0 (1)    │ result (1) │ command (1) │ field count(1) │ zero (12)    │
//! └──────────┴────────────┴─────────────┴────────────────┴──────────────┘
//!
//! Field: size u32 (id byte + data) | id u8 | data
//! ```
//!
//! The password never travels in clear: the credential field carries its
//! SHA-256 digest.

use bytes::{BufMut, Bytes, BytesMut};
use sha2::{Digest as _, Sha256};

use aerie_core::{Error, Result, ResultCode};

use crate::particle::Reader;
use crate::proto::{begin_frame, finish_frame, ProtoType};

/// Size of the admin header in bytes.
pub const ADMIN_HEADER_SIZE: usize = 16;

/// Login command code.
pub const LOGIN: u8 = 20;

/// Field id: user name.
pub const FIELD_USER: u8 = 0;
/// Field id: hashed password.
pub const FIELD_CREDENTIAL: u8 = 3;

/// SHA-256 of the password.
pub fn hash_password(password: &str) -> [u8; 32] {
    let digest = Sha256::digest(password.as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

fn put_field(out: &mut BytesMut, id: u8, data: &[u8]) {
    out.put_u32(data.len() as u32 + 1);
    out.put_u8(id);
    out.put_slice(data);
}

/// Encode a login request frame.
pub fn encode_login(user: &str, password: &str) -> Bytes {
    let mut out = BytesMut::with_capacity(64 + user.len());
    let at = begin_frame(&mut out);
    out.put_u8(0);
    out.put_u8(0);
    out.put_u8(LOGIN);
    out.put_u8(2);
    out.put_bytes(0, 12);
    put_field(&mut out, FIELD_USER, user.as_bytes());
    put_field(&mut out, FIELD_CREDENTIAL, &hash_password(password));
    finish_frame(&mut out, at, ProtoType::Admin);
    out.freeze()
}

/// A decoded login request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    /// User name
    pub user: String,
    /// SHA-256 of the password
    pub credential: Vec<u8>,
}

/// Decode a login request payload.
pub fn decode_login(payload: &[u8]) -> Result<LoginRequest> {
    let mut r = Reader::new(payload);
    let header = r.take(ADMIN_HEADER_SIZE)?;
    if header[2] != LOGIN {
        return Err(Error::protocol(format!("unexpected admin command {}", header[2])));
    }
    let mut user = None;
    let mut credential = None;
    for _ in 0..header[3] {
        let size = r.u32()? as usize;
        if size == 0 {
            return Err(Error::protocol("zero-length admin field"));
        }
        let id = r.u8()?;
        let data = r.take(size - 1)?;
        match id {
            FIELD_USER => {
                user = Some(
                    std::str::from_utf8(data)
                        .map_err(|e| Error::protocol(format!("user name is not UTF-8: {}", e)))?
                        .to_string(),
                )
            }
            FIELD_CREDENTIAL => credential = Some(data.to_vec()),
            _ => {}
        }
    }
    match (user, credential) {
        (Some(user), Some(credential)) => Ok(LoginRequest { user, credential }),
        _ => Err(Error::protocol("login request missing user or credential")),
    }
}

/// Encode an admin response frame carrying only a status.
pub fn encode_admin_response(code: ResultCode) -> Bytes {
    let mut out = BytesMut::with_capacity(8 + ADMIN_HEADER_SIZE);
    let at = begin_frame(&mut out);
    out.put_u8(0);
    out.put_u8(code.code() as u8);
    out.put_bytes(0, ADMIN_HEADER_SIZE - 2);
    finish_frame(&mut out, at, ProtoType::Admin);
    out.freeze()
}

/// Status of an admin response payload.
pub fn decode_admin_response(payload: &[u8]) -> Result<ResultCode> {
    let mut r = Reader::new(payload);
    let header = r.take(ADMIN_HEADER_SIZE)?;
    Ok(ResultCode::from(header[1]))
}
