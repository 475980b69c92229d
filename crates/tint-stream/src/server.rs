//! TCP server accepting tint connections.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{info, warn};

use tint_session::Dispatcher;

use crate::connection::ServerConnection;
use crate::framing::LengthPrefixedFramed;
use crate::handshake::{hello_exchange_acceptor, ConnectionError, HandshakeConfig};
use crate::tls::ServerTlsConfig;

/// Configuration for a [`Server`].
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub handshake: HandshakeConfig,
    /// Terminate connections with TLS when set.
    pub tls: Option<ServerTlsConfig>,
}

/// Accepts connections and drives one [`ServerConnection`] per peer.
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    pub fn new(dispatcher: Dispatcher, config: ServerConfig) -> Self {
        Self {
            config,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Accept connections forever, spawning a driver task per connection.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        let acceptor = match &self.config.tls {
            Some(tls) => Some(
                tls.build_acceptor()
                    .map_err(|e| std::io::Error::other(e.to_string()))?,
            ),
            None => None,
        };

        let server = Arc::new(self);
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            info!(%peer_addr, "connection accepted");
            let server = server.clone();
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let result = match &acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => server.drive(tls_stream).await,
                        Err(e) => {
                            warn!(%peer_addr, error = %e, "tls accept failed");
                            return;
                        }
                    },
                    None => server.drive(stream).await,
                };
                match result {
                    Ok(()) => info!(%peer_addr, "connection closed"),
                    Err(e) => warn!(%peer_addr, error = %e, "connection failed"),
                }
            });
        }
    }

    /// Accept exactly one connection and drive it to completion.
    pub async fn accept_one(&self, listener: &TcpListener) -> Result<(), ConnectionError> {
        let (stream, _peer_addr) = listener.accept().await.map_err(ConnectionError::Io)?;
        match &self.config.tls {
            Some(tls) => {
                let acceptor = tls
                    .build_acceptor()
                    .map_err(|e| ConnectionError::Dispatch(e.to_string()))?;
                let stream = acceptor.accept(stream).await.map_err(ConnectionError::Io)?;
                self.drive(stream).await
            }
            None => self.drive(stream).await,
        }
    }

    async fn drive<S>(&self, stream: S) -> Result<(), ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut io = LengthPrefixedFramed::new(stream);
        let _peer_metadata = hello_exchange_acceptor(&mut io, &self.config.handshake).await?;
        ServerConnection::new(io, self.dispatcher.clone()).run().await
    }
}

/// Convenience: bind a listener. `"127.0.0.1:0"` picks a free port.
pub async fn bind(addr: &str) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}
