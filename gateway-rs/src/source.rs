//! Request and origin-side response data model

use mime::Mime;
use url::Url;

use crate::error::TransformError;

/// Gemini status codes used by this gateway
pub mod status {
    pub const SUCCESS: u8 = 20;
    pub const REDIRECT_TEMPORARY: u8 = 30;
    pub const REDIRECT_PERMANENT: u8 = 31;
    pub const TEMPORARY_FAILURE: u8 = 40;
    pub const NOT_FOUND: u8 = 51;
    pub const GONE: u8 = 52;
    pub const PROXY_REFUSED: u8 = 53;
    pub const BAD_REQUEST: u8 = 59;
}

/// A validated client request, immutable for the life of the connection
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub remote_addr: String,
}

/// A response body, consumable exactly once.
///
/// Origin bodies start as a live HTTP stream; transformers that buffer the
/// content replace it with the bytes they produced.
#[derive(Debug)]
pub enum Body {
    Remote(reqwest::Response),
    Bytes(Vec<u8>),
}

impl Body {
    /// Drain the body into memory, consuming it
    pub async fn into_bytes(self) -> Result<Vec<u8>, TransformError> {
        match self {
            Body::Bytes(bytes) => Ok(bytes),
            Body::Remote(response) => Ok(response
                .bytes()
                .await
                .map_err(|e| TransformError::Decode(format!("failed to read origin body: {}", e)))?
                .to_vec()),
        }
    }
}

/// The intermediate, origin-side result of a fetch, expressed in Gemini
/// terms. Produced by a requestor, rewritten by at most one transformer,
/// serialized by the response writer.
#[derive(Debug)]
pub struct SourceResponse {
    /// Status code in the Gemini status space
    pub status: u8,
    /// Meta field: a mime type on success, a message or URL otherwise
    pub meta: String,
    /// The parsed origin Content-Type header, if one was present
    pub content_type: Option<Mime>,
    pub body: Option<Body>,
}

impl SourceResponse {
    /// A bodyless response (redirects, errors)
    pub fn status_only(status: u8, meta: impl Into<String>) -> Self {
        Self {
            status,
            meta: meta.into(),
            content_type: None,
            body: None,
        }
    }
}
