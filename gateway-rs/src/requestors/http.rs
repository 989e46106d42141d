//! HTTP/HTTPS origin requestor
//!
//! Performs a single GET per request and maps the HTTP result into the
//! Gemini status space. Redirects are not followed (they are translated),
//! compressed responses are transparently decoded, and a declared charset
//! is validated eagerly so unusable bytes never reach a transformer.

use async_trait::async_trait;
use mime::Mime;
use reqwest::header;
use std::time::Duration;
use url::Url;

use crate::charset;
use crate::config::FetchConfig;
use crate::error::Result;
use crate::source::{status, Body, SourceResponse};

use super::Requestor;

pub struct HttpRequestor {
    client: reqwest::Client,
}

impl HttpRequestor {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Requestor for HttpRequestor {
    fn supports_protocol(&self, url: &Url) -> bool {
        url.scheme() == "http" || url.scheme() == "https"
    }

    async fn fetch(&self, url: &Url) -> Result<SourceResponse> {
        let response = self.client.get(url.as_str()).send().await?;

        let http_status = response.status().as_u16();
        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match translate_status(http_status, location.as_deref(), content_type.as_deref(), url) {
            Translation::Success { meta, content_type } => Ok(SourceResponse {
                status: status::SUCCESS,
                meta,
                content_type,
                body: Some(Body::Remote(response)),
            }),
            Translation::Terminal(source) => Ok(source),
        }
    }
}

/// Outcome of translating an HTTP status: either a success that should
/// carry the live body, or a terminal bodyless response
enum Translation {
    Success {
        meta: String,
        content_type: Option<Mime>,
    },
    Terminal(SourceResponse),
}

/// Map an HTTP result onto the Gemini status space
fn translate_status(
    http_status: u16,
    location: Option<&str>,
    content_type: Option<&str>,
    request_url: &Url,
) -> Translation {
    match http_status {
        200 => translate_success(content_type),
        301 | 308 => Translation::Terminal(SourceResponse::status_only(
            status::REDIRECT_PERMANENT,
            resolve_redirect(request_url, location),
        )),
        302 | 307 => Translation::Terminal(SourceResponse::status_only(
            status::REDIRECT_TEMPORARY,
            resolve_redirect(request_url, location),
        )),
        404 => Translation::Terminal(SourceResponse::status_only(
            status::NOT_FOUND,
            "File not found",
        )),
        410 => Translation::Terminal(SourceResponse::status_only(status::GONE, "Gone")),
        code => Translation::Terminal(SourceResponse::status_only(
            status::TEMPORARY_FAILURE,
            format!("Generic error. HTTP response code: {}", code),
        )),
    }
}

fn translate_success(content_type: Option<&str>) -> Translation {
    let meta = content_type
        .map(str::to_string)
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let parsed = content_type.and_then(|ct| ct.parse::<Mime>().ok());

    // Eagerly validate any declared charset: handing undecodable bytes to a
    // transformer helps nobody, so downgrade to a temporary failure here.
    if let Some(ref ct) = parsed {
        if let Some(cs) = charset::declared_charset(ct) {
            if charset::encoding_for_label(&cs).is_none() {
                return Translation::Terminal(SourceResponse::status_only(
                    status::TEMPORARY_FAILURE,
                    format!("Unable to proxy content. Unknown charset '{}'", cs),
                ));
            }
        }
    }

    Translation::Success {
        meta,
        content_type: parsed,
    }
}

/// Resolve a Location header against the request URL, absolutizing
/// relative targets. A missing or unparseable target yields an empty meta.
fn resolve_redirect(request_url: &Url, location: Option<&str>) -> String {
    match location {
        Some(target) => request_url
            .join(target)
            .map(|u| u.to_string())
            .unwrap_or_default(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn terminal(t: Translation) -> SourceResponse {
        match t {
            Translation::Terminal(s) => s,
            Translation::Success { .. } => panic!("expected terminal translation"),
        }
    }

    #[test]
    fn test_200_with_content_type() {
        let t = translate_status(
            200,
            None,
            Some("text/html; charset=utf-8"),
            &url("https://example.com/"),
        );
        match t {
            Translation::Success { meta, content_type } => {
                assert_eq!(meta, "text/html; charset=utf-8");
                assert_eq!(content_type.unwrap().type_(), mime::TEXT);
            }
            Translation::Terminal(_) => panic!("expected success translation"),
        }
    }

    #[test]
    fn test_200_without_content_type_defaults_to_octet_stream() {
        match translate_status(200, None, None, &url("https://example.com/")) {
            Translation::Success { meta, content_type } => {
                assert_eq!(meta, "application/octet-stream");
                assert!(content_type.is_none());
            }
            Translation::Terminal(_) => panic!("expected success translation"),
        }
    }

    #[test]
    fn test_bogus_declared_charset_downgrades_to_40() {
        let s = terminal(translate_status(
            200,
            None,
            Some("text/html; charset=\"bogus-9999\""),
            &url("https://example.com/"),
        ));
        assert_eq!(s.status, status::TEMPORARY_FAILURE);
        assert!(s.meta.contains("bogus-9999"));
        assert!(s.body.is_none());
    }

    #[test]
    fn test_redirect_mapping() {
        let base = url("https://example.com/a/b");

        let s = terminal(translate_status(301, Some("/c"), None, &base));
        assert_eq!(s.status, status::REDIRECT_PERMANENT);
        assert_eq!(s.meta, "https://example.com/c");

        let s = terminal(translate_status(308, Some("https://other.org/"), None, &base));
        assert_eq!(s.status, status::REDIRECT_PERMANENT);
        assert_eq!(s.meta, "https://other.org/");

        let s = terminal(translate_status(302, Some("next"), None, &base));
        assert_eq!(s.status, status::REDIRECT_TEMPORARY);
        assert_eq!(s.meta, "https://example.com/a/next");

        let s = terminal(translate_status(307, None, None, &base));
        assert_eq!(s.status, status::REDIRECT_TEMPORARY);
        assert_eq!(s.meta, "");
    }

    #[test]
    fn test_error_statuses() {
        let base = url("https://example.com/");

        let s = terminal(translate_status(404, None, None, &base));
        assert_eq!(s.status, status::NOT_FOUND);
        assert_eq!(s.meta, "File not found");

        let s = terminal(translate_status(410, None, None, &base));
        assert_eq!(s.status, status::GONE);
        assert_eq!(s.meta, "Gone");

        let s = terminal(translate_status(503, None, None, &base));
        assert_eq!(s.status, status::TEMPORARY_FAILURE);
        assert_eq!(s.meta, "Generic error. HTTP response code: 503");
    }
}
