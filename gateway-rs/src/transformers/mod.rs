//! Content transformation pipeline
//!
//! An ordered, fixed list of transformers is consulted for the first whose
//! `can_transform` accepts the response's mime type; that transformer fully
//! replaces the meta and body. Unmatched content (plain text, unknown
//! binary types) passes through unchanged.

pub mod feed;
pub mod html;
pub mod image;
pub mod text;

use async_trait::async_trait;

use crate::config::ImageConfig;
use crate::error::TransformError;
use crate::source::{status, Body, Request, SourceResponse};

pub use feed::FeedTransformer;
pub use html::HtmlTransformer;
pub use image::ImageTransformer;

/// A pluggable rewriter for one class of origin content type
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Can this transformer handle this mime type?
    fn can_transform(&self, mime_type: &str) -> bool;

    /// Rewrite the response's meta and body. The incoming body is consumed;
    /// the returned representation is the only valid one from here on.
    async fn transform(
        &self,
        request: &Request,
        response: SourceResponse,
    ) -> Result<SourceResponse, TransformError>;
}

/// The ordered pipeline: HTML, then feeds, then images
pub struct TransformPipeline {
    transformers: Vec<Box<dyn Transformer>>,
}

impl TransformPipeline {
    pub fn new(image_config: ImageConfig) -> Self {
        Self {
            transformers: vec![
                Box::new(HtmlTransformer::new()),
                Box::new(FeedTransformer::new()),
                Box::new(ImageTransformer::new(image_config)),
            ],
        }
    }

    /// Apply the first matching transformer, if any.
    ///
    /// A transformation failure is deliberately surfaced as readable
    /// content: a status-20 response whose body explains the error, so
    /// clients see prose instead of a protocol failure.
    pub async fn transform(&self, request: &Request, original: SourceResponse) -> SourceResponse {
        for transformer in &self.transformers {
            if transformer.can_transform(&original.meta) {
                return match transformer.transform(request, original).await {
                    Ok(transformed) => transformed,
                    Err(e) => {
                        let message = format!("Error transforming content ({})\n", e);
                        SourceResponse {
                            status: status::SUCCESS,
                            meta: "text/gemini".to_string(),
                            content_type: None,
                            body: Some(Body::Bytes(message.into_bytes())),
                        }
                    }
                };
            }
        }
        original
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn request() -> Request {
        Request {
            url: Url::parse("https://example.com/").unwrap(),
            remote_addr: "-".to_string(),
        }
    }

    fn pipeline() -> TransformPipeline {
        TransformPipeline::new(ImageConfig::default())
    }

    #[tokio::test]
    async fn test_unmatched_type_passes_through() {
        let original = SourceResponse {
            status: status::SUCCESS,
            meta: "text/plain".to_string(),
            content_type: None,
            body: Some(Body::Bytes(b"just text".to_vec())),
        };
        let out = pipeline().transform(&request(), original).await;
        assert_eq!(out.meta, "text/plain");
        assert_eq!(out.body.unwrap().into_bytes().await.unwrap(), b"just text");
    }

    #[tokio::test]
    async fn test_redirect_meta_never_matches() {
        let original = SourceResponse::status_only(status::REDIRECT_PERMANENT, "https://example.com/");
        let out = pipeline().transform(&request(), original).await;
        assert_eq!(out.status, status::REDIRECT_PERMANENT);
        assert!(out.body.is_none());
    }

    #[tokio::test]
    async fn test_failure_becomes_readable_success() {
        // Sniffed charset with no decoder forces a transform error
        let html = b"<html><head><meta charset=\"bogus-9999\"></head><body>x</body></html>";
        let original = SourceResponse {
            status: status::SUCCESS,
            meta: "text/html".to_string(),
            content_type: None,
            body: Some(Body::Bytes(html.to_vec())),
        };
        let out = pipeline().transform(&request(), original).await;
        assert_eq!(out.status, status::SUCCESS);
        assert_eq!(out.meta, "text/gemini");
        let body = String::from_utf8(out.body.unwrap().into_bytes().await.unwrap()).unwrap();
        assert!(body.contains("Error transforming content"));
        assert!(body.contains("bogus-9999"));
    }

    #[tokio::test]
    async fn test_first_match_wins_in_pipeline_order() {
        let p = pipeline();
        let matches: Vec<bool> = p
            .transformers
            .iter()
            .map(|t| t.can_transform("text/html; charset=utf-8"))
            .collect();
        assert_eq!(matches, vec![true, false, false]);
    }
}
