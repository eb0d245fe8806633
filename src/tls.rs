//! TLS server acceptor for the tls-line service.
//!
//! Loads a PEM certificate chain and private key and wraps accepted TCP
//! streams in a rustls server session. Client certificates are not
//! requested.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::ring::default_provider;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use crate::error::TlsError;

fn ensure_crypto_provider() {
    // Already installed is fine.
    let _ = CryptoProvider::install_default(default_provider());
}

/// Cloneable handshake acceptor shared by all connections.
#[derive(Clone)]
pub struct TlsServerAcceptor {
    inner: TlsAcceptor,
}

impl TlsServerAcceptor {
    /// Build an acceptor from PEM files.
    ///
    /// # Errors
    ///
    /// Fails if either file cannot be read, holds no usable item, or the
    /// key does not fit the certificate.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        ensure_crypto_provider();

        let certs = load_certificates(cert_path)?;
        let key = load_private_key(key_path)?;

        let server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TlsError::Config(format!("failed to configure server cert: {e}")))?;

        Ok(Self {
            inner: TlsAcceptor::from(Arc::new(server_config)),
        })
    }

    /// Run the server side of the handshake.
    pub async fn accept(&self, stream: TcpStream) -> Result<TlsStream<TcpStream>, TlsError> {
        self.inner
            .accept(stream)
            .await
            .map_err(|e| TlsError::Handshake(e.to_string()))
    }
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = std::fs::File::open(path).map_err(|e| TlsError::CertificateLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|result| match result {
            Ok(cert) => Some(cert),
            Err(e) => {
                warn!(error = %e, "Skipping invalid certificate");
                None
            }
        })
        .collect();

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }

    debug!(count = certs.len(), path = %path.display(), "Loaded certificates");
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = std::fs::File::open(path).map_err(|e| TlsError::PrivateKeyLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut reader = BufReader::new(file);

    // PKCS#1, PKCS#8 and SEC1 keys are all accepted; the first one wins.
    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(key)) => {
            debug!(path = %path.display(), "Loaded private key");
            Ok(key)
        }
        Ok(None) => Err(TlsError::NoPrivateKey(path.display().to_string())),
        Err(e) => Err(TlsError::PrivateKeyLoad {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
    }
}
