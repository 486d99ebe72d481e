//! TLS transport support for CubeSQL connections
//!
//! This module provides TLS for the SSL encryption modes. It supports:
//! - Server verification against a root certificate file or the webpki roots
//! - Client certificates (mutual TLS)
//! - SNI (Server Name Indication)
//!
//! Without a root certificate source the server certificate is not verified,
//! which matches how CubeSQL servers are usually deployed with self-signed
//! certificates.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use rustls_pemfile::{certs, private_key};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};

/// TLS configuration for CubeSQL connections
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    /// Server name for SNI (defaults to connection host)
    pub server_name: Option<String>,
    /// Path to a root certificate file (PEM format)
    pub ca_cert_path: Option<String>,
    /// Verify against the bundled webpki roots when no root file is set
    pub use_webpki_roots: bool,
    /// Path to client certificate file (PEM format) for mTLS
    pub client_cert_path: Option<String>,
    /// Path to client private key file (PEM format)
    pub client_key_path: Option<String>,
}

impl TlsConfig {
    /// Create a new TLS configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server name for SNI
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Verify the server against the certificates in this PEM file
    pub fn with_ca_cert(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Verify the server against the webpki root set
    pub fn with_webpki_roots(mut self) -> Self {
        self.use_webpki_roots = true;
        self
    }

    /// Set client certificate and key paths for mTLS
    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<String>,
        key_path: impl Into<String>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    /// Whether the server certificate will be verified
    pub fn verifies_server(&self) -> bool {
        self.ca_cert_path.is_some() || self.use_webpki_roots
    }

    /// Build the rustls ClientConfig from this configuration
    pub fn build_client_config(&self) -> Result<ClientConfig> {
        let builder = if self.verifies_server() {
            let mut root_store = RootCertStore::empty();
            if let Some(ca_path) = &self.ca_cert_path {
                for cert in load_certs_from_file(ca_path)? {
                    root_store
                        .add(cert)
                        .map_err(|e| Error::Security(format!("failed to add root cert: {}", e)))?;
                }
            } else {
                root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
            ClientConfig::builder().with_root_certificates(root_store)
        } else {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipCertVerification))
        };

        let config = match (&self.client_cert_path, &self.client_key_path) {
            (Some(cert_path), Some(key_path)) => {
                let client_certs = load_certs_from_file(cert_path)?;
                let client_key = load_private_key_from_file(key_path)?;
                builder
                    .with_client_auth_cert(client_certs, client_key)
                    .map_err(|e| Error::Security(format!("failed to configure client auth: {}", e)))?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => {
                return Err(Error::InvalidConfig(
                    "client certificate and key must be given together".to_string(),
                ))
            }
        };

        Ok(config)
    }
}

/// Wrap a connected TCP stream in TLS
pub async fn connect_tls(
    tcp_stream: TcpStream,
    server_name: &str,
    config: &TlsConfig,
) -> Result<TlsStream<TcpStream>> {
    let client_config = config.build_client_config()?;
    let connector = TlsConnector::from(Arc::new(client_config));

    let sni_name = config.server_name.as_deref().unwrap_or(server_name);
    let server_name = ServerName::try_from(sni_name.to_string())
        .map_err(|_| Error::Security(format!("invalid server name for TLS: {}", sni_name)))?;

    let tls_stream = connector
        .connect(server_name, tcp_stream)
        .await
        .map_err(|e| Error::Security(format!("TLS handshake failed: {}", e)))?;

    tracing::debug!(server = sni_name, verified = config.verifies_server(), "tls established");
    Ok(tls_stream)
}

/// Load certificates from a PEM file
fn load_certs_from_file(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| Error::Security(format!("failed to open cert file {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = certs(&mut reader).filter_map(|r| r.ok()).collect();

    if certs.is_empty() {
        return Err(Error::Security(format!("no certificates found in {}", path)));
    }

    Ok(certs)
}

/// Load private key from a PEM file
fn load_private_key_from_file(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| Error::Security(format!("failed to open key file {}: {}", path, e)))?;
    let mut reader = BufReader::new(file);

    private_key(&mut reader)
        .map_err(|e| Error::Security(format!("failed to parse key file {}: {}", path, e)))?
        .ok_or_else(|| Error::Security(format!("no private key found in {}", path)))
}

/// Accepts any server certificate; handshake signatures are still checked
#[derive(Debug)]
struct SkipCertVerification;

impl ServerCertVerifier for SkipCertVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_config_default() {
        let config = TlsConfig::default();
        assert!(!config.verifies_server());
        assert!(config.server_name.is_none());
    }

    #[test]
    fn test_tls_config_builder() {
        let config = TlsConfig::new()
            .with_server_name("db.example.com")
            .with_ca_cert("/path/to/root.pem")
            .with_client_cert("/path/to/client.pem", "/path/to/client.key");

        assert_eq!(config.server_name.as_deref(), Some("db.example.com"));
        assert_eq!(config.ca_cert_path.as_deref(), Some("/path/to/root.pem"));
        assert_eq!(config.client_key_path.as_deref(), Some("/path/to/client.key"));
        assert!(config.verifies_server());
    }

    #[test]
    fn test_unverified_config_builds() {
        assert!(TlsConfig::new().build_client_config().is_ok());
    }

    #[test]
    fn test_webpki_config_builds() {
        let config = TlsConfig::new().with_webpki_roots();
        assert!(config.verifies_server());
        assert!(config.build_client_config().is_ok());
    }

    #[test]
    fn test_missing_root_file() {
        let config = TlsConfig::new().with_ca_cert("/nonexistent/root.pem");
        assert!(matches!(
            config.build_client_config(),
            Err(Error::Security(_))
        ));
    }
}
