//! Error types for gateway-rs

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Origin fetch error
    #[error("{0}")]
    Fetch(#[from] reqwest::Error),

    /// No requestor knows the URL scheme
    #[error("No known requestor for protocol '{0}'")]
    UnsupportedProtocol(String),
}

/// Typed failure for the content-transformation pipeline.
///
/// The pipeline boundary converts these into a readable status-20 body
/// rather than a protocol-level failure.
#[derive(Error, Debug)]
pub enum TransformError {
    /// A declared or sniffed charset has no known decoder
    #[error("unknown charset '{0}'")]
    UnsupportedCharset(String),

    /// Content claimed to be a feed but could not be parsed as one
    #[error("unable to parse feed: {0}")]
    MalformedFeed(String),

    /// Body bytes could not be decoded (image formats, truncated reads)
    #[error("{0}")]
    Decode(String),
}
