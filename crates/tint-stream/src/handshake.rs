//! Hello exchange and connection-level errors.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use tint_wire::{Message, Metadata, PROTOCOL_VERSION};

use crate::framing::LengthPrefixedFramed;

/// Error during connection handling.
#[derive(Debug)]
pub enum ConnectionError {
    /// IO error on the transport.
    Io(io::Error),
    /// The peer violated the protocol; a `Goodbye` was sent where possible.
    ProtocolViolation {
        reason: &'static str,
        context: String,
    },
    /// Failure inside dispatch infrastructure (encoding a reply, mostly).
    Dispatch(String),
    /// The peer said `Goodbye` or closed before the handshake finished.
    Closed,
}

impl From<io::Error> for ConnectionError {
    fn from(e: io::Error) -> Self {
        ConnectionError::Io(e)
    }
}

impl std::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionError::Io(e) => write!(f, "io error: {e}"),
            ConnectionError::ProtocolViolation { reason, context } => {
                if context.is_empty() {
                    write!(f, "protocol violation: {reason}")
                } else {
                    write!(f, "protocol violation: {reason}: {context}")
                }
            }
            ConnectionError::Dispatch(msg) => write!(f, "dispatch error: {msg}"),
            ConnectionError::Closed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Parameters for the Hello exchange.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Metadata presented to the peer during the exchange.
    pub metadata: Metadata,
    /// How long to wait for the peer's side of the exchange.
    pub timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            metadata: Metadata::new(),
            timeout: Duration::from_secs(5),
        }
    }
}

async fn goodbye<S>(
    io: &mut LengthPrefixedFramed<S>,
    reason: &'static str,
    context: String,
) -> ConnectionError
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let _ = io
        .send(&Message::Goodbye {
            reason: reason.into(),
        })
        .await;
    ConnectionError::ProtocolViolation { reason, context }
}

/// Wait for the initiator's `Hello`, verify the version, answer with
/// `HelloYourself`. Returns the peer's handshake metadata.
pub async fn hello_exchange_acceptor<S>(
    io: &mut LengthPrefixedFramed<S>,
    config: &HandshakeConfig,
) -> Result<Metadata, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let peer = match io.recv_timeout(config.timeout).await? {
        Some(Message::Hello { version, metadata }) => {
            if version != PROTOCOL_VERSION {
                return Err(goodbye(
                    io,
                    "unsupported protocol version",
                    format!("peer sent version {version}, expected {PROTOCOL_VERSION}"),
                )
                .await);
            }
            metadata
        }
        Some(other) => {
            return Err(goodbye(
                io,
                "handshake ordering",
                format!("expected Hello, got {other:?}"),
            )
            .await);
        }
        None => return Err(ConnectionError::Closed),
    };

    io.send(&Message::HelloYourself {
        metadata: config.metadata.clone(),
    })
    .await?;

    Ok(peer)
}

/// Send `Hello` and wait for the acceptor's `HelloYourself`. Returns the
/// peer's handshake metadata.
pub async fn hello_exchange_initiator<S>(
    io: &mut LengthPrefixedFramed<S>,
    config: &HandshakeConfig,
) -> Result<Metadata, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    io.send(&Message::Hello {
        version: PROTOCOL_VERSION,
        metadata: config.metadata.clone(),
    })
    .await?;

    match io.recv_timeout(config.timeout).await? {
        Some(Message::HelloYourself { metadata }) => Ok(metadata),
        Some(Message::Goodbye { reason }) => Err(ConnectionError::ProtocolViolation {
            reason: "rejected by peer",
            context: reason,
        }),
        Some(other) => Err(goodbye(
            io,
            "handshake ordering",
            format!("expected HelloYourself, got {other:?}"),
        )
        .await),
        None => Err(ConnectionError::Closed),
    }
}
