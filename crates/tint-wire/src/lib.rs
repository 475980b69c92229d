#![deny(unsafe_code)]

//! Wire-level types for the tint RPC protocol.
//!
//! Everything that crosses the connection is defined here: the [`Message`]
//! envelope, call [`Metadata`], the [`Status`] error taxonomy, and the pixel
//! data model carried by the built-in transform service.

mod message;
mod metadata;
mod pixel;
mod requests;
mod status;

pub use message::{
    decode_reply, encode_reply_err, encode_reply_ok, method_id, CallResult, Message,
    RequestIdGenerator, PROTOCOL_VERSION,
};
pub use metadata::{Metadata, MetadataValue, KEY_AUTHORIZATION, KEY_TIMEOUT_MS};
pub use pixel::{Color, Pixel, Point};
pub use requests::{EchoRequest, EchoResponse, HelloRequest, HelloResponse};
pub use status::{Code, FieldViolation, Status, StatusDetail};
