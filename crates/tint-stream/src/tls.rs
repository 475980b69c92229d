//! TLS configuration for transport encryption.
//!
//! The server presents an [`Identity`] (certificate chain + key); the client
//! verifies it against a trusted root [`Certificate`] and pins the expected
//! server name. A failed verification aborts connection establishment; it
//! is never surfaced as a per-call error.

use std::io::{BufReader, Cursor};
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// TLS setup error.
#[derive(Debug)]
pub enum TlsError {
    /// PEM/DER material could not be read or parsed.
    Pem(String),
    /// rustls rejected the configuration.
    Config(String),
    /// The pinned server name is not a valid DNS name or IP.
    InvalidServerName(String),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::Pem(msg) => write!(f, "tls certificate error: {msg}"),
            TlsError::Config(msg) => write!(f, "tls config error: {msg}"),
            TlsError::InvalidServerName(name) => write!(f, "invalid tls server name: {name}"),
        }
    }
}

impl std::error::Error for TlsError {}

/// One or more certificates used as trust roots.
#[derive(Clone)]
pub struct Certificate {
    der_certs: Vec<CertificateDer<'static>>,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("cert_count", &self.der_certs.len())
            .finish()
    }
}

impl Certificate {
    /// Parse PEM-encoded bytes; may contain a certificate chain.
    pub fn from_pem(pem_data: impl AsRef<[u8]>) -> Result<Self, TlsError> {
        let mut reader = BufReader::new(Cursor::new(pem_data.as_ref()));
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::Pem(format!("failed to parse PEM certificate: {e}")))?;

        if certs.is_empty() {
            return Err(TlsError::Pem("no certificates found in PEM data".into()));
        }

        Ok(Self { der_certs: certs })
    }

    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, TlsError> {
        let pem_data = std::fs::read(path.as_ref()).map_err(|e| {
            TlsError::Pem(format!(
                "failed to read certificate file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_pem(pem_data)
    }

    fn der_certs(&self) -> &[CertificateDer<'static>] {
        &self.der_certs
    }
}

/// Server identity: a certificate chain and its private key.
pub struct Identity {
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
}

impl Clone for Identity {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            private_key: self.private_key.clone_key(),
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("cert_count", &self.cert_chain.len())
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Parse PEM-encoded certificate and key bytes.
    pub fn from_pem(cert_pem: impl AsRef<[u8]>, key_pem: impl AsRef<[u8]>) -> Result<Self, TlsError> {
        let mut cert_reader = BufReader::new(Cursor::new(cert_pem.as_ref()));
        let cert_chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::Pem(format!("failed to parse certificate PEM: {e}")))?;

        if cert_chain.is_empty() {
            return Err(TlsError::Pem("no certificates found in PEM data".into()));
        }

        let mut key_reader = BufReader::new(Cursor::new(key_pem.as_ref()));
        let private_key = rustls_pemfile::private_key(&mut key_reader)
            .map_err(|e| TlsError::Pem(format!("failed to parse private key PEM: {e}")))?
            .ok_or_else(|| TlsError::Pem("no private key found in PEM data".into()))?;

        Ok(Self {
            cert_chain,
            private_key,
        })
    }

    pub fn from_pem_files(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, TlsError> {
        let cert_pem = std::fs::read(cert_path.as_ref()).map_err(|e| {
            TlsError::Pem(format!(
                "failed to read certificate file '{}': {e}",
                cert_path.as_ref().display()
            ))
        })?;
        let key_pem = std::fs::read(key_path.as_ref()).map_err(|e| {
            TlsError::Pem(format!(
                "failed to read key file '{}': {e}",
                key_path.as_ref().display()
            ))
        })?;
        Self::from_pem(cert_pem, key_pem)
    }
}

/// Server-side TLS: terminate incoming connections with this identity.
#[derive(Debug, Clone)]
pub struct ServerTlsConfig {
    pub identity: Identity,
}

impl ServerTlsConfig {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }

    pub fn build_acceptor(&self) -> Result<TlsAcceptor, TlsError> {
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(
                self.identity.cert_chain.clone(),
                self.identity.private_key.clone_key(),
            )
            .map_err(|e| TlsError::Config(format!("invalid server identity: {e}")))?;
        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

/// Client-side TLS: verify the server against `root` and pin `server_name`.
#[derive(Debug, Clone)]
pub struct ClientTlsConfig {
    pub root: Certificate,
    pub server_name: String,
}

impl ClientTlsConfig {
    pub fn new(root: Certificate, server_name: impl Into<String>) -> Self {
        Self {
            root,
            server_name: server_name.into(),
        }
    }

    pub fn build_connector(&self) -> Result<(TlsConnector, ServerName<'static>), TlsError> {
        let mut root_store = RootCertStore::empty();
        for cert in self.root.der_certs() {
            root_store
                .add(cert.clone())
                .map_err(|e| TlsError::Config(format!("failed to add root certificate: {e}")))?;
        }

        let config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let server_name = ServerName::try_from(self.server_name.clone())
            .map_err(|_| TlsError::InvalidServerName(self.server_name.clone()))?;

        Ok((TlsConnector::from(Arc::new(config)), server_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Install the ring crypto provider for tests.
    fn install_crypto_provider() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    // A self-signed certificate and key, generated once for these tests:
    //   openssl req -x509 -newkey rsa:2048 -nodes -days 3650 \
    //     -keyout key.pem -out cert.pem -subj /CN=localhost \
    //     -addext subjectAltName=DNS:localhost
    const TEST_CERT_PEM: &str = include_str!("../testdata/cert.pem");
    const TEST_KEY_PEM: &str = include_str!("../testdata/key.pem");

    #[test]
    fn certificate_from_pem() {
        let cert = Certificate::from_pem(TEST_CERT_PEM).unwrap();
        assert_eq!(cert.der_certs().len(), 1);
    }

    #[test]
    fn certificate_from_garbage_fails() {
        assert!(Certificate::from_pem("not a certificate").is_err());
    }

    #[test]
    fn identity_from_pem() {
        let identity = Identity::from_pem(TEST_CERT_PEM, TEST_KEY_PEM).unwrap();
        assert_eq!(identity.cert_chain.len(), 1);
    }

    #[test]
    fn identity_missing_key_fails() {
        let err = Identity::from_pem(TEST_CERT_PEM, TEST_CERT_PEM).unwrap_err();
        assert!(matches!(err, TlsError::Pem(_)));
    }

    #[test]
    fn server_config_builds_acceptor() {
        install_crypto_provider();
        let identity = Identity::from_pem(TEST_CERT_PEM, TEST_KEY_PEM).unwrap();
        assert!(ServerTlsConfig::new(identity).build_acceptor().is_ok());
    }

    #[test]
    fn client_config_builds_connector() {
        install_crypto_provider();
        let root = Certificate::from_pem(TEST_CERT_PEM).unwrap();
        let (_, name) = ClientTlsConfig::new(root, "localhost")
            .build_connector()
            .unwrap();
        assert_eq!(name.to_str(), "localhost");
    }

    #[test]
    fn bad_server_name_is_rejected() {
        install_crypto_provider();
        let root = Certificate::from_pem(TEST_CERT_PEM).unwrap();
        let err = ClientTlsConfig::new(root, "bad name with spaces")
            .build_connector()
            .err()
            .unwrap();
        assert!(matches!(err, TlsError::InvalidServerName(_)));
    }
}
