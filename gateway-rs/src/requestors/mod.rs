//! Origin requestors
//!
//! A requestor fetches a URL over one origin protocol and translates the
//! result into Gemini terms. `NetRequestor` holds the configured requestors
//! and dispatches to the first one that supports a URL's scheme. The design
//! anticipates further origin schemes joining the list.

pub mod http;

use async_trait::async_trait;
use url::Url;

use crate::config::FetchConfig;
use crate::error::{GatewayError, Result};
use crate::source::SourceResponse;

pub use http::HttpRequestor;

/// A fetcher for one class of origin protocol
#[async_trait]
pub trait Requestor: Send + Sync {
    /// Does this requestor know how to fetch this URL's scheme?
    fn supports_protocol(&self, url: &Url) -> bool;

    /// Fetch the URL and translate the result into Gemini terms
    async fn fetch(&self, url: &Url) -> Result<SourceResponse>;
}

/// Holds all configured requestors and selects the appropriate one
pub struct NetRequestor {
    requestors: Vec<Box<dyn Requestor>>,
}

impl NetRequestor {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            requestors: vec![Box::new(HttpRequestor::new(config)?)],
        })
    }

    pub fn supports_protocol(&self, url: &Url) -> bool {
        self.requestors.iter().any(|r| r.supports_protocol(url))
    }

    /// Dispatch to the first requestor that supports the scheme.
    /// An unroutable scheme is a dispatch error, reported upstream as 40.
    pub async fn fetch(&self, url: &Url) -> Result<SourceResponse> {
        for requestor in &self.requestors {
            if requestor.supports_protocol(url) {
                return requestor.fetch(url).await;
            }
        }
        Err(GatewayError::UnsupportedProtocol(url.scheme().to_string()))
    }
}
