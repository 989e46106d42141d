//! TLS configuration and certificate management
//!
//! Loads a static certificate/key pair or generates a self-signed
//! certificate for development. TLS 1.2 is the minimum accepted version.

use rustls::ServerConfig;
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::config::TlsConfig;
use crate::error::{GatewayError, Result};

/// TLS manager for handling certificates
pub struct TlsManager {
    config: Option<TlsConfig>,
    hostname: String,
}

impl TlsManager {
    /// Create a new TLS manager
    pub fn new(config: Option<TlsConfig>, hostname: String) -> Self {
        Self { config, hostname }
    }

    /// Build a TLS acceptor from configuration.
    ///
    /// An unusable certificate is a fatal startup condition, never a
    /// per-request error.
    pub fn build_acceptor(&self) -> Result<TlsAcceptor> {
        let server_config = self.build_server_config()?;
        Ok(TlsAcceptor::from(Arc::new(server_config)))
    }

    /// Build rustls server config
    fn build_server_config(&self) -> Result<ServerConfig> {
        if let Some(ref tls) = self.config {
            if let (Some(cert_path), Some(key_path)) = (&tls.cert_path, &tls.key_path) {
                info!("Loading TLS certificate from {} and {}", cert_path, key_path);
                return self.load_static_certs(Path::new(cert_path), Path::new(key_path));
            }
        }

        info!("No TLS certificate configured, generating self-signed certificate");
        self.generate_self_signed()
    }

    /// Load certificates from files
    fn load_static_certs(&self, cert_path: &Path, key_path: &Path) -> Result<ServerConfig> {
        // Load certificates
        let cert_file = File::open(cert_path)
            .map_err(|e| GatewayError::Tls(format!("Failed to open certificate file: {}", e)))?;
        let mut cert_reader = BufReader::new(cert_file);
        let certs_der = certs(&mut cert_reader)
            .map_err(|e| GatewayError::Tls(format!("Failed to read certificates: {}", e)))?;

        if certs_der.is_empty() {
            return Err(GatewayError::Tls("No certificates found in file".to_string()));
        }

        // Load private key
        let key_file = File::open(key_path)
            .map_err(|e| GatewayError::Tls(format!("Failed to open key file: {}", e)))?;
        let mut key_reader = BufReader::new(key_file);

        // Try PKCS8 first, then RSA
        let keys = pkcs8_private_keys(&mut key_reader)
            .map_err(|e| GatewayError::Tls(format!("Failed to read PKCS8 keys: {}", e)))?;

        let key = if !keys.is_empty() {
            rustls::PrivateKey(keys[0].clone())
        } else {
            // Reset reader and try RSA
            let key_file = File::open(key_path)
                .map_err(|e| GatewayError::Tls(format!("Failed to open key file: {}", e)))?;
            let mut key_reader = BufReader::new(key_file);
            let rsa_keys = rsa_private_keys(&mut key_reader)
                .map_err(|e| GatewayError::Tls(format!("Failed to read RSA keys: {}", e)))?;

            if rsa_keys.is_empty() {
                return Err(GatewayError::Tls("No private key found in file".to_string()));
            }
            rustls::PrivateKey(rsa_keys[0].clone())
        };

        let certs: Vec<rustls::Certificate> =
            certs_der.into_iter().map(rustls::Certificate).collect();

        Self::server_config_with(certs, key)
    }

    /// Generate a self-signed certificate for development
    fn generate_self_signed(&self) -> Result<ServerConfig> {
        let cert = rcgen::generate_simple_self_signed(vec![self.hostname.clone()])
            .map_err(|e| GatewayError::Tls(format!("Failed to generate self-signed cert: {}", e)))?;

        let cert_der = cert.cert.der().to_vec();
        let key_der = cert.key_pair.serialize_der();

        let certs = vec![rustls::Certificate(cert_der)];
        let key = rustls::PrivateKey(key_der);

        Self::server_config_with(certs, key)
    }

    /// Build a server config that rejects anything older than TLS 1.2
    fn server_config_with(
        certs: Vec<rustls::Certificate>,
        key: rustls::PrivateKey,
    ) -> Result<ServerConfig> {
        let config = ServerConfig::builder()
            .with_safe_default_cipher_suites()
            .with_safe_default_kx_groups()
            .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
            .map_err(|e| GatewayError::Tls(format!("TLS config error: {}", e)))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| GatewayError::Tls(format!("TLS config error: {}", e)))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_generation() {
        let manager = TlsManager::new(None, "localhost".to_string());
        let result = manager.generate_self_signed();
        assert!(result.is_ok());
    }

    #[test]
    fn test_tls_manager_build_acceptor() {
        let manager = TlsManager::new(None, "localhost".to_string());
        let acceptor = manager.build_acceptor();
        assert!(acceptor.is_ok());
    }

    #[test]
    fn test_missing_cert_file_is_fatal() {
        let manager = TlsManager::new(
            Some(TlsConfig {
                cert_path: Some("/nonexistent/cert.pem".to_string()),
                key_path: Some("/nonexistent/key.pem".to_string()),
            }),
            "localhost".to_string(),
        );
        assert!(manager.build_acceptor().is_err());
    }
}
