use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Metadata, Status};

/// Protocol version carried in `Hello`. Peers must agree exactly.
pub const PROTOCOL_VERSION: u32 = 1;

/// Outcome of one call as encoded inside a `Response` payload.
pub type CallResult<T> = Result<T, Status>;

/// Protocol message. One message per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Sent by the initiator as the first message of a connection.
    Hello { version: u32, metadata: Metadata },

    /// Sent by the acceptor in answer to `Hello`.
    HelloYourself { metadata: Metadata },

    /// Open a call. For a unary method the payload is the encoded request;
    /// for a stream method the payload is empty and elements follow as
    /// `Data` messages.
    Request {
        request_id: u64,
        method_id: u64,
        metadata: Metadata,
        payload: Vec<u8>,
    },

    /// Final outcome of a call. The payload encodes `CallResult<T>`; the
    /// `Err` arm's encoding does not depend on `T`, so infrastructure can
    /// emit errors without knowing the method's types.
    Response {
        request_id: u64,
        metadata: Metadata,
        payload: Vec<u8>,
    },

    /// One stream element belonging to the identified call.
    Data { request_id: u64, payload: Vec<u8> },

    /// End-of-stream for the sender's direction of the identified call.
    CloseSend { request_id: u64 },

    /// Caller asks the callee to stop working on a call. Best-effort; the
    /// callee still answers with a `Response`.
    Cancel { request_id: u64 },

    /// Connection teardown with a reason.
    Goodbye { reason: String },
}

/// Generates request IDs for one connection: monotonically increasing,
/// starting at 1. ID 0 is never issued.
pub struct RequestIdGenerator {
    next: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Method identifier: FNV-1a 64 over `"<service>/<method>"`.
///
/// Computable in const context so descriptors can be `static`.
pub const fn method_id(service: &str, method: &str) -> u64 {
    let hash = fnv1a(FNV_OFFSET, service.as_bytes());
    let hash = fnv1a(hash, b"/");
    fnv1a(hash, method.as_bytes())
}

/// Encode a successful reply payload: `CallResult::Ok(value)`.
pub fn encode_reply_ok<T: Serialize>(value: &T) -> Result<Vec<u8>, postcard::Error> {
    postcard::to_allocvec::<CallResult<&T>>(&Ok(value))
}

/// Encode a failed reply payload.
///
/// Encoded as `CallResult::<()>::Err`, which decodes correctly as the `Err`
/// arm of any `CallResult<T>`.
pub fn encode_reply_err(status: &Status) -> Result<Vec<u8>, postcard::Error> {
    postcard::to_allocvec::<Result<(), &Status>>(&Err(status))
}

/// Decode a reply payload into the call outcome.
///
/// A payload that fails to parse is reported as an internal error: it means
/// the peers disagree about the method's types.
pub fn decode_reply<T: DeserializeOwned>(payload: &[u8]) -> CallResult<T> {
    match postcard::from_bytes::<CallResult<T>>(payload) {
        Ok(result) => result,
        Err(e) => Err(Status::internal(format!("malformed reply payload: {e}"))),
    }
}
