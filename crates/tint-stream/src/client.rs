//! Client handle and connector.
//!
//! [`connect`] establishes the transport (optionally TLS), performs the
//! handshake, and spawns the connection driver. The returned [`Client`] is
//! cheap to clone; all clones share the connection.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use tint_session::{bearer_value, Inbound, MethodDescriptor};
use tint_wire::{
    decode_reply, Metadata, RequestIdGenerator, Status, KEY_AUTHORIZATION, KEY_TIMEOUT_MS,
};

use crate::connection::{ClientDriver, ClientEvent, CLIENT_STREAM_BUFFER};
use crate::framing::LengthPrefixedFramed;
use crate::handshake::{hello_exchange_initiator, ConnectionError, HandshakeConfig};
use crate::tls::{ClientTlsConfig, TlsError};

/// Error establishing a connection.
#[derive(Debug)]
pub enum ConnectError {
    Io(std::io::Error),
    Tls(TlsError),
    Handshake(ConnectionError),
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::Io(e) => write!(f, "connect failed: {e}"),
            ConnectError::Tls(e) => write!(f, "tls setup failed: {e}"),
            ConnectError::Handshake(e) => write!(f, "handshake failed: {e}"),
        }
    }
}

impl std::error::Error for ConnectError {}

impl From<std::io::Error> for ConnectError {
    fn from(e: std::io::Error) -> Self {
        ConnectError::Io(e)
    }
}

/// Configuration for [`connect`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Bearer token attached to every call's metadata.
    pub token: Option<String>,
    /// Per-call deadline, propagated to the server and enforced locally.
    pub timeout: Option<Duration>,
    pub handshake: HandshakeConfig,
    /// Verify the server against this root and pin its name.
    pub tls: Option<ClientTlsConfig>,
}

/// Connect over TCP, with TLS when configured, and spawn the driver.
pub async fn connect(addr: &str, config: ClientConfig) -> Result<Client, ConnectError> {
    let stream = TcpStream::connect(addr).await?;

    let tls = config.tls.clone();
    match tls {
        Some(tls) => {
            let (connector, server_name) =
                tls.build_connector().map_err(ConnectError::Tls)?;
            let stream = connector.connect(server_name, stream).await?;
            finish_connect(stream, config).await
        }
        None => finish_connect(stream, config).await,
    }
}

async fn finish_connect<S>(stream: S, config: ClientConfig) -> Result<Client, ConnectError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut io = LengthPrefixedFramed::new(stream);
    let _peer_metadata = hello_exchange_initiator(&mut io, &config.handshake)
        .await
        .map_err(ConnectError::Handshake)?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        if let Err(e) = ClientDriver::new(io, events_rx).run().await {
            debug!(error = %e, "client connection ended");
        }
    });

    Ok(Client {
        events: events_tx,
        ids: Arc::new(RequestIdGenerator::new()),
        token: config.token,
        timeout: config.timeout,
    })
}

/// Handle for issuing calls over one connection.
#[derive(Clone)]
pub struct Client {
    events: mpsc::UnboundedSender<ClientEvent>,
    ids: Arc<RequestIdGenerator>,
    token: Option<String>,
    timeout: Option<Duration>,
}

impl Client {
    fn call_metadata(&self, with_timeout: bool) -> Metadata {
        let mut metadata = Metadata::new();
        if let Some(token) = &self.token {
            metadata.insert(KEY_AUTHORIZATION, bearer_value(token));
        }
        if with_timeout {
            if let Some(timeout) = self.timeout {
                metadata.insert(KEY_TIMEOUT_MS, timeout.as_millis() as u64);
            }
        }
        metadata
    }

    /// Issue a unary call and wait for its outcome.
    ///
    /// The configured timeout is enforced on both sides: propagated as
    /// `timeout-ms` metadata, and raced locally so a dead peer cannot hold
    /// the caller past its deadline.
    pub async fn call<Req, Resp>(
        &self,
        method: &'static MethodDescriptor,
        request: &Req,
    ) -> Result<Resp, Status>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = postcard::to_allocvec(request)
            .map_err(|e| Status::internal(format!("encode request: {e}")))?;
        let request_id = self.ids.next();
        let (reply_tx, reply_rx) = oneshot::channel();

        self.events
            .send(ClientEvent::Unary {
                request_id,
                method_id: method.id,
                metadata: self.call_metadata(true),
                payload,
                reply: reply_tx,
            })
            .map_err(|_| Status::cancelled("connection closed"))?;

        let received = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, reply_rx).await {
                Ok(received) => received,
                Err(_elapsed) => {
                    let _ = self.events.send(ClientEvent::Cancel { request_id });
                    return Err(Status::deadline_exceeded("deadline exceeded"));
                }
            },
            None => reply_rx.await,
        };

        let payload = received.map_err(|_| Status::cancelled("connection closed"))??;
        decode_reply::<Resp>(&payload)
    }

    /// Open a bidirectional stream call.
    pub fn open_stream<T>(&self, method: &'static MethodDescriptor) -> Result<CallStream<T>, Status>
    where
        T: Serialize + DeserializeOwned,
    {
        let request_id = self.ids.next();
        let (inbound_tx, inbound_rx) = mpsc::channel(CLIENT_STREAM_BUFFER);
        let (done_tx, done_rx) = oneshot::channel();

        self.events
            .send(ClientEvent::OpenStream {
                request_id,
                method_id: method.id,
                // Streams are long-lived; no deadline is attached.
                metadata: self.call_metadata(false),
                inbound: inbound_tx,
                done: done_tx,
            })
            .map_err(|_| Status::cancelled("connection closed"))?;

        Ok(CallStream {
            request_id,
            events: self.events.clone(),
            inbound: inbound_rx,
            done: done_rx,
            finished: false,
            _marker: PhantomData,
        })
    }
}

/// Caller end of one bidirectional stream.
///
/// Dropping the stream without [`CallStream::finish`] sends a best-effort
/// `Cancel` so the callee is not left serving an abandoned call.
pub struct CallStream<T> {
    request_id: u64,
    events: mpsc::UnboundedSender<ClientEvent>,
    inbound: mpsc::Receiver<Inbound>,
    done: oneshot::Receiver<Result<(), Status>>,
    finished: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CallStream<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Send one element outbound.
    pub fn send(&self, element: &T) -> Result<(), Status> {
        let payload = postcard::to_allocvec(element)
            .map_err(|e| Status::internal(format!("encode stream element: {e}")))?;
        self.events
            .send(ClientEvent::StreamData {
                request_id: self.request_id,
                payload,
            })
            .map_err(|_| Status::cancelled("connection closed"))
    }

    /// Signal end-of-stream for our direction.
    pub fn close_send(&self) -> Result<(), Status> {
        self.events
            .send(ClientEvent::StreamCloseSend {
                request_id: self.request_id,
            })
            .map_err(|_| Status::cancelled("connection closed"))
    }

    /// Receive the next transformed element. `Ok(None)` is the peer's clean
    /// end-of-stream.
    pub async fn recv(&mut self) -> Result<Option<T>, Status> {
        match self.inbound.recv().await {
            Some(Inbound::Element(bytes)) => {
                let element = postcard::from_bytes(&bytes).map_err(|e| {
                    Status::internal(format!("malformed stream element from server: {e}"))
                })?;
                Ok(Some(element))
            }
            Some(Inbound::End) => Ok(None),
            Some(Inbound::Error(status)) => Err(status),
            None => Err(Status::cancelled("connection closed")),
        }
    }

    /// Wait for the call's final outcome.
    pub async fn finish(mut self) -> Result<(), Status> {
        self.finished = true;
        (&mut self.done)
            .await
            .map_err(|_| Status::cancelled("connection closed"))?
    }
}

impl<T> Drop for CallStream<T> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.events.send(ClientEvent::Cancel {
                request_id: self.request_id,
            });
        }
    }
}
