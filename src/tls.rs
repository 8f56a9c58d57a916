//! Optional TLS front-end for the listener: uses the system default
//! client-auth purpose with the certificate chain loaded from disk.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::errors::SupervisorError;

/// Build a `TlsAcceptor` from a PEM certificate chain and private key on
/// disk. No client-auth is configured — inbound telemetry senders
/// authenticate via the application-level token, not mutual TLS.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, SupervisorError> {
    let cert_chain = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|e| SupervisorError::TlsConfig(format!("invalid certificate/key pair: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, SupervisorError> {
    let file = std::fs::File::open(path).map_err(|e| SupervisorError::TlsConfig(format!("reading {path:?}: {e}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| SupervisorError::TlsConfig(format!("parsing certificate chain {path:?}: {e}")))
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, SupervisorError> {
    let file = std::fs::File::open(path).map_err(|e| SupervisorError::TlsConfig(format!("reading {path:?}: {e}")))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| SupervisorError::TlsConfig(format!("parsing private key {path:?}: {e}")))?
        .ok_or_else(|| SupervisorError::TlsConfig(format!("no private key found in {path:?}")))
}
