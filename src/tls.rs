//! TLS listener setup: loads a PEM certificate chain and private key into
//! a `rustls` server configuration and wraps it as a Tokio acceptor.

use crate::error::{Error, Result};
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Builds a [`TlsAcceptor`] from PEM-encoded certificate chain and private
/// key bytes. When `trust_pem` is given, client certificates are verified
/// against it (mutual TLS); otherwise any client connects without a
/// certificate.
pub fn build_acceptor(key_pem: &[u8], cert_pem: &[u8], trust_pem: Option<&[u8]>) -> Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_pem))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::TlsError(e.to_string()))?;
    if certs.is_empty() {
        return Err(Error::TlsError("no certificates found in PEM input".to_owned()));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem))
        .map_err(|e| Error::TlsError(e.to_string()))?
        .ok_or_else(|| Error::TlsError("no private key found in PEM input".to_owned()))?;

    let builder = rustls::ServerConfig::builder();
    let config = if let Some(trust_pem) = trust_pem {
        let mut roots = rustls::RootCertStore::empty();
        for trust_cert in rustls_pemfile::certs(&mut BufReader::new(trust_pem)) {
            let trust_cert = trust_cert.map_err(|e| Error::TlsError(e.to_string()))?;
            roots
                .add(trust_cert)
                .map_err(|e| Error::TlsError(e.to_string()))?;
        }
        let verifier = rustls::server::WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| Error::TlsError(e.to_string()))?;
        builder
            .with_client_cert_verifier(verifier)
            .with_single_cert(certs, key)
            .map_err(|e| Error::TlsError(e.to_string()))?
    } else {
        builder
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::TlsError(e.to_string()))?
    };

    Ok(TlsAcceptor::from(Arc::new(config)))
}
