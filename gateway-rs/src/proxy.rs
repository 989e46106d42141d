//! Proxy core: fetch, transform, respond
//!
//! Orchestrates one validated request: fetch via the origin requestors,
//! run the transformation pipeline, and serialize the result. Any failure
//! before the status line is out becomes a well-formed error response.

use tokio::io::AsyncWrite;
use tracing::debug;
use url::Url;

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::requestors::NetRequestor;
use crate::response::GeminiResponse;
use crate::source::Request;
use crate::transformers::TransformPipeline;

pub struct ProxyCore {
    requestor: NetRequestor,
    pipeline: TransformPipeline,
}

impl ProxyCore {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        Ok(Self {
            requestor: NetRequestor::new(&config.fetch)?,
            pipeline: TransformPipeline::new(config.image.clone()),
        })
    }

    /// Does this proxy know how to handle the protocol for a URL?
    pub fn supports_protocol(&self, url: &Url) -> bool {
        self.requestor.supports_protocol(url)
    }

    /// Proxy one request end to end, always leaving a complete response
    /// behind: a failure after the status line has been sent can only be
    /// logged, never reported to the client.
    pub async fn proxy_request<S: AsyncWrite + Unpin>(
        &self,
        request: &Request,
        response: &mut GeminiResponse<'_, S>,
    ) {
        if let Err(e) = self.run(request, response).await {
            if response.status().is_none() {
                let _ = response.error(&e.to_string()).await;
            } else {
                debug!("error after status line for {}: {}", request.url, e);
            }
        }
    }

    async fn run<S: AsyncWrite + Unpin>(
        &self,
        request: &Request,
        response: &mut GeminiResponse<'_, S>,
    ) -> Result<()> {
        let source = self.requestor.fetch(&request.url).await?;
        let source = self.pipeline.transform(request, source).await;

        response.write_status_line(source.status, &source.meta).await?;
        if let Some(body) = source.body {
            response.copy_from(body).await?;
        }
        Ok(())
    }
}
