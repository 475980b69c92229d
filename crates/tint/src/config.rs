//! Service configuration.
//!
//! One explicit struct gathers everything the server and client
//! constructors need; nothing in the stack reads process-wide state.

use std::path::PathBuf;
use std::time::Duration;

use tint_session::BuildError;
use tint_stream::{
    Certificate, ClientConfig, ClientTlsConfig, HandshakeConfig, Identity, ServerConfig,
    ServerTlsConfig, TlsError,
};

/// Configuration for the built-in transform service.
#[derive(Debug, Clone)]
pub struct TintConfig {
    /// Address the server listens on.
    pub listen_addr: String,
    /// Shared bearer secret. `None` disables call authentication.
    pub token: Option<String>,
    /// Artificial delay used by the `"timeout"` error simulation.
    pub simulated_delay: Duration,
    /// Per-call deadline applied by clients.
    pub call_timeout: Option<Duration>,
    /// Server certificate chain (PEM). TLS is enabled when both this and
    /// `tls_key` are set.
    pub tls_cert: Option<PathBuf>,
    /// Server private key (PEM).
    pub tls_key: Option<PathBuf>,
    /// Trust root used by clients to verify the server (PEM).
    pub tls_ca: Option<PathBuf>,
    /// Server name clients pin when verifying the certificate.
    pub server_name: String,
}

impl Default for TintConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50051".into(),
            token: None,
            simulated_delay: Duration::from_secs(2),
            call_timeout: None,
            tls_cert: None,
            tls_key: None,
            tls_ca: None,
            server_name: "localhost".into(),
        }
    }
}

impl TintConfig {
    /// Transport configuration for the server side.
    pub fn server_config(&self) -> Result<ServerConfig, TlsError> {
        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => {
                let identity = Identity::from_pem_files(cert, key)?;
                Some(ServerTlsConfig::new(identity))
            }
            _ => None,
        };
        Ok(ServerConfig {
            handshake: HandshakeConfig::default(),
            tls,
        })
    }

    /// Transport configuration for the client side.
    pub fn client_config(&self) -> Result<ClientConfig, TlsError> {
        let tls = match &self.tls_ca {
            Some(ca) => {
                let root = Certificate::from_pem_file(ca)?;
                Some(ClientTlsConfig::new(root, self.server_name.clone()))
            }
            None => None,
        };
        Ok(ClientConfig {
            token: self.token.clone(),
            timeout: self.call_timeout,
            handshake: HandshakeConfig::default(),
            tls,
        })
    }
}

/// Error starting the service.
#[derive(Debug)]
pub enum ServeError {
    /// The dispatch table failed its startup completeness check.
    Build(BuildError),
    Tls(TlsError),
    Io(std::io::Error),
}

impl std::fmt::Display for ServeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServeError::Build(e) => write!(f, "dispatch table error: {e}"),
            ServeError::Tls(e) => write!(f, "tls error: {e}"),
            ServeError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for ServeError {}

impl From<BuildError> for ServeError {
    fn from(e: BuildError) -> Self {
        ServeError::Build(e)
    }
}

impl From<TlsError> for ServeError {
    fn from(e: TlsError) -> Self {
        ServeError::Tls(e)
    }
}

impl From<std::io::Error> for ServeError {
    fn from(e: std::io::Error) -> Self {
        ServeError::Io(e)
    }
}
