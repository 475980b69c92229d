#![deny(unsafe_code)]

//! Byte-stream transport for tint RPC.
//!
//! Runs the call pipeline from `tint-session` over any async byte stream:
//! length-prefixed postcard framing, a Hello exchange, then a per-connection
//! driver multiplexing unary and stream calls by request id. TCP is the
//! built-in transport, with optional TLS termination on either side.

mod client;
mod connection;
mod framing;
mod handshake;
mod server;
pub mod tls;

pub use client::{connect, CallStream, Client, ClientConfig, ConnectError};
pub use connection::ServerConnection;
pub use framing::LengthPrefixedFramed;
pub use handshake::{
    hello_exchange_acceptor, hello_exchange_initiator, ConnectionError, HandshakeConfig,
};
pub use server::{bind, Server, ServerConfig};
pub use tls::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig, TlsError};
