//! Configuration for gateway-rs

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{GatewayError, Result};

/// Main gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// TLS configuration (optional; absent means a self-signed dev cert)
    pub tls: Option<TlsConfig>,
    /// Origin fetch configuration
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Image conversion configuration
    #[serde(default)]
    pub image: ImageConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:1965")
    pub listen_addr: String,
    /// Public hostname, used for the self-signed certificate SAN
    #[serde(default = "default_hostname")]
    pub hostname: String,
    /// Replace client IPs with "-" in access logs
    #[serde(default = "default_mask_ips")]
    pub mask_client_ips: bool,
}

/// TLS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to PEM certificate
    pub cert_path: Option<String>,
    /// Path to PEM private key
    pub key_path: Option<String>,
}

/// Origin fetch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Origin request timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub timeout_seconds: u64,
    /// Identifying client-agent string sent to origins
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Image conversion configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageConfig {
    /// Maximum width/height before downscaling
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    /// Quality used when re-encoding to JPEG
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_mask_ips() -> bool {
    true
}

fn default_fetch_timeout() -> u64 {
    20
}

fn default_user_agent() -> String {
    format!("gateway-rs/{} (gemini gateway)", env!("CARGO_PKG_VERSION"))
}

fn default_max_dimension() -> u32 {
    800
}

fn default_jpeg_quality() -> u8 {
    75
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_fetch_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_dimension: default_max_dimension(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default development configuration
    pub fn development() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "127.0.0.1:1965".to_string(),
                hostname: default_hostname(),
                mask_client_ips: default_mask_ips(),
            },
            tls: None,
            fetch: FetchConfig::default(),
            image: ImageConfig::default(),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.server
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| {
                GatewayError::Config(format!(
                    "Invalid listen address '{}': {}",
                    self.server.listen_addr, e
                ))
            })?;

        if let Some(ref tls) = self.tls {
            // A cert without a key (or vice versa) is a misconfiguration
            if tls.cert_path.is_some() != tls.key_path.is_some() {
                return Err(GatewayError::Config(
                    "TLS requires both cert_path and key_path".to_string(),
                ));
            }
        }

        if self.image.jpeg_quality == 0 || self.image.jpeg_quality > 100 {
            return Err(GatewayError::Config(
                "image.jpeg_quality must be between 1 and 100".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::development()
    }
}
