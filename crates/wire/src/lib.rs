//! Wire codec for the Aerie client
//!
//! Three protocols share one framing layer ([`proto`]):
//! - Message frames carry record commands ([`message`], [`command`], [`response`])
//! - Info frames carry line-oriented cluster metadata ([`info`])
//! - Admin frames carry authentication ([`admin`])
//!
//! Values are encoded as particles ([`particle`]). Every decoder is bounds
//! checked: malformed input is a `Protocol` error, never a panic.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod admin;
pub mod command;
pub mod info;
pub mod message;
pub mod particle;
pub mod proto;
pub mod response;

pub use command::{BatchEntry, BatchKey, ScanParams, UdfCall};
pub use message::{Field, Message, MsgHeader, WireOp};
pub use proto::{Frame, FrameDecoder, ProtoType, MAX_FRAME_LEN};
pub use response::{decode_response, decode_stream, Response};
