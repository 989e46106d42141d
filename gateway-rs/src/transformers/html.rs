//! HTML to gemtext transformer
//!
//! Decodes the source document (header charset first, then sniffed, then
//! UTF-8), extracts the title, any advertised feed, the Open Graph image
//! and type, and rewrites the body into gemtext. Whatever the source
//! charset was, the output is UTF-8.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::fmt::Write;
use url::Url;

use crate::charset;
use crate::error::TransformError;
use crate::source::{Body, Request, SourceResponse};

use super::text::{append_footer, create_url, normalize};
use super::Transformer;

/// Companion reading-view service for pages advertising themselves as
/// articles
const ARTICLE_READER_URL: &str = "gemini://gemi.dev/cgi-bin/waffle.cgi/article";

pub struct HtmlTransformer;

impl HtmlTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HtmlTransformer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transformer for HtmlTransformer {
    fn can_transform(&self, mime_type: &str) -> bool {
        mime_type.starts_with("text/html")
    }

    async fn transform(
        &self,
        request: &Request,
        mut response: SourceResponse,
    ) -> Result<SourceResponse, TransformError> {
        let body = response
            .body
            .take()
            .ok_or_else(|| TransformError::Decode("response has no body".to_string()))?;
        let bytes = body.into_bytes().await?;

        let html = decode_html(&bytes, response.content_type.as_ref())?;
        let content = convert(&request.url, &html);
        let rendered = render(&request.url, &content, bytes.len() as u64);

        // whatever the source charset was, it is now UTF-8
        response.meta = "text/gemini;charset=utf-8".to_string();
        response.body = Some(Body::Bytes(rendered.into_bytes()));
        Ok(response)
    }
}

/// Decode the raw document to text. A charset in the Content-Type header
/// overrides everything; otherwise the document's own declaration (BOM or
/// meta tag) is used; otherwise UTF-8. An undecodable declared charset is
/// a typed failure that names the charset.
fn decode_html(
    bytes: &[u8],
    content_type: Option<&mime::Mime>,
) -> Result<String, TransformError> {
    if let Some(label) = content_type.and_then(charset::declared_charset) {
        let encoding = charset::encoding_for_label(&label)
            .ok_or(TransformError::UnsupportedCharset(label))?;
        return Ok(encoding.decode(bytes).0.into_owned());
    }

    if let Some(label) = charset::sniff_declared_charset(bytes) {
        let encoding = charset::encoding_for_label(&label)
            .ok_or(TransformError::UnsupportedCharset(label))?;
        return Ok(encoding.decode(bytes).0.into_owned());
    }

    Ok(encoding_rs::UTF_8.decode(bytes).0.into_owned())
}

struct ConvertedContent {
    title: Option<String>,
    feed_url: Option<Url>,
    og_image: Option<Url>,
    og_type: Option<String>,
    gemtext: String,
}

fn selector(s: &str) -> Selector {
    Selector::parse(s).unwrap()
}

fn convert(base: &Url, html: &str) -> ConvertedContent {
    let doc = Html::parse_document(html);

    let title = doc
        .select(&selector("title"))
        .next()
        .map(|el| normalize(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let feed_url = doc
        .select(&selector(r#"link[rel="alternate"]"#))
        .find(|el| {
            el.value()
                .attr("type")
                .map(|t| t.contains("rss+xml") || t.contains("atom+xml"))
                .unwrap_or(false)
        })
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| base.join(href).ok());

    let og_image = doc
        .select(&selector(r#"meta[property="og:image"]"#))
        .next()
        .and_then(|el| el.value().attr("content"))
        .and_then(|content| base.join(content).ok())
        .filter(|u| create_url(u.as_str()).is_some());

    let og_type = doc
        .select(&selector(r#"meta[property="og:type"]"#))
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|t| t.trim().to_ascii_lowercase());

    let mut renderer = GemtextRenderer::new(base);
    if let Some(body) = doc.select(&selector("body")).next() {
        renderer.visit_children(body);
    }
    let gemtext = renderer.finish();

    ConvertedContent {
        title,
        feed_url,
        og_image,
        og_type,
        gemtext,
    }
}

fn render(page_url: &Url, content: &ConvertedContent, original_size: u64) -> String {
    let mut out = String::new();

    if let Some(ref title) = content.title {
        let _ = writeln!(out, "# {}", title);
    }
    if let Some(ref feed) = content.feed_url {
        let _ = writeln!(out, "=> {} RSS/Atom feed detected", feed);
    }
    if let Some(ref image) = content.og_image {
        let _ = writeln!(out, "=> {} Featured image", image);
    }
    if content.og_type.as_deref() == Some("article") {
        let encoded: String =
            url::form_urlencoded::byte_serialize(page_url.as_str().as_bytes()).collect();
        let _ = writeln!(
            out,
            "=> {}?{} Article detected. View in reading mode?",
            ARTICLE_READER_URL, encoded
        );
    }
    out.push('\n');

    out.push_str(&content.gemtext);
    let converted_size = content.gemtext.len() as u64;
    append_footer(&mut out, original_size, converted_size);
    out
}

/// Elements whose content never reaches the output
const SKIPPED: [&str; 7] = [
    "script", "style", "noscript", "template", "svg", "iframe", "form",
];

/// Elements whose text flows into the surrounding paragraph
const INLINE: [&str; 14] = [
    "b", "i", "em", "strong", "span", "code", "small", "u", "s", "sub", "sup", "abbr", "mark",
    "time",
];

/// Walks the document body, emitting gemtext blocks: paragraphs, headings,
/// list items, quotes, preformatted blocks, and `=>` link lines gathered
/// from each block.
struct GemtextRenderer<'a> {
    base: &'a Url,
    out: String,
    paragraph: String,
    links: Vec<(Url, String)>,
}

impl<'a> GemtextRenderer<'a> {
    fn new(base: &'a Url) -> Self {
        Self {
            base,
            out: String::new(),
            paragraph: String::new(),
            links: Vec::new(),
        }
    }

    fn finish(mut self) -> String {
        self.flush_paragraph();
        self.out.trim_end().to_string()
    }

    fn visit_children(&mut self, el: ElementRef<'_>) {
        for child in el.children() {
            match child.value() {
                scraper::Node::Text(t) => self.paragraph.push_str(t),
                scraper::Node::Element(_) => {
                    if let Some(child_el) = ElementRef::wrap(child) {
                        self.visit_element(child_el);
                    }
                }
                _ => {}
            }
        }
    }

    fn visit_element(&mut self, el: ElementRef<'_>) {
        let name = el.value().name();

        if SKIPPED.contains(&name) {
            return;
        }
        if INLINE.contains(&name) {
            self.visit_children(el);
            return;
        }

        match name {
            "br" => self.paragraph.push(' '),
            "hr" => self.flush_paragraph(),
            "a" => {
                let label = normalize(&el.text().collect::<String>());
                self.paragraph.push(' ');
                self.paragraph.push_str(&label);
                self.paragraph.push(' ');
                if let Some(href) = el.value().attr("href") {
                    if let Some(url) = self
                        .base
                        .join(href)
                        .ok()
                        .and_then(|u| create_url(u.as_str()))
                    {
                        let label = if label.is_empty() {
                            url.to_string()
                        } else {
                            label
                        };
                        self.links.push((url, label));
                    }
                }
            }
            "h1" => self.heading("#", el),
            "h2" => self.heading("##", el),
            "h3" | "h4" | "h5" | "h6" => self.heading("###", el),
            "li" => {
                self.flush_paragraph();
                let text = normalize(&el.text().collect::<String>());
                if !text.is_empty() {
                    let _ = writeln!(self.out, "* {}", text);
                }
                self.collect_links(el);
            }
            "blockquote" => {
                self.flush_paragraph();
                let text = normalize(&el.text().collect::<String>());
                if !text.is_empty() {
                    let _ = writeln!(self.out, "> {}\n", text);
                }
                self.collect_links(el);
                self.emit_links();
            }
            "pre" => {
                self.flush_paragraph();
                let raw: String = el.text().collect();
                let _ = writeln!(self.out, "```\n{}\n```\n", raw.trim_end());
            }
            "ul" | "ol" => {
                self.flush_paragraph();
                self.visit_children(el);
                self.out.push('\n');
                self.emit_links();
            }
            // everything else is treated as a block container
            _ => {
                self.flush_paragraph();
                self.visit_children(el);
                self.flush_paragraph();
            }
        }
    }

    fn heading(&mut self, marker: &str, el: ElementRef<'_>) {
        self.flush_paragraph();
        let text = normalize(&el.text().collect::<String>());
        if !text.is_empty() {
            let _ = writeln!(self.out, "{} {}\n", marker, text);
        }
    }

    /// Gather link targets from a finished block without re-rendering them
    /// inline
    fn collect_links(&mut self, el: ElementRef<'_>) {
        for anchor in el.select(&selector("a")) {
            if let Some(href) = anchor.value().attr("href") {
                if let Some(url) = self
                    .base
                    .join(href)
                    .ok()
                    .and_then(|u| create_url(u.as_str()))
                {
                    let label = normalize(&anchor.text().collect::<String>());
                    let label = if label.is_empty() {
                        url.to_string()
                    } else {
                        label
                    };
                    self.links.push((url, label));
                }
            }
        }
    }

    fn flush_paragraph(&mut self) {
        let text = normalize(&self.paragraph);
        self.paragraph.clear();
        if !text.is_empty() {
            let _ = writeln!(self.out, "{}\n", text);
        }
        self.emit_links();
    }

    fn emit_links(&mut self) {
        if self.links.is_empty() {
            return;
        }
        for (url, label) in self.links.drain(..) {
            let _ = writeln!(self.out, "=> {} {}", url, label);
        }
        self.out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::status;

    fn request() -> Request {
        Request {
            url: Url::parse("https://example.com/page").unwrap(),
            remote_addr: "-".to_string(),
        }
    }

    fn html_response(bytes: &[u8], content_type: Option<&str>) -> SourceResponse {
        SourceResponse {
            status: status::SUCCESS,
            meta: content_type.unwrap_or("text/html").to_string(),
            content_type: content_type.and_then(|ct| ct.parse().ok()),
            body: Some(Body::Bytes(bytes.to_vec())),
        }
    }

    async fn transform_to_text(bytes: &[u8], content_type: Option<&str>) -> String {
        let out = HtmlTransformer::new()
            .transform(&request(), html_response(bytes, content_type))
            .await
            .unwrap();
        String::from_utf8(out.body.unwrap().into_bytes().await.unwrap()).unwrap()
    }

    #[test]
    fn test_can_transform() {
        let t = HtmlTransformer::new();
        assert!(t.can_transform("text/html"));
        assert!(t.can_transform("text/html; charset=utf-8"));
        assert!(!t.can_transform("text/plain"));
        assert!(!t.can_transform("application/xhtml+xml"));
    }

    #[tokio::test]
    async fn test_simple_document() {
        let text = transform_to_text(
            b"<html><head><title>Hi</title></head><body><p>Hello</p></body></html>",
            Some("text/html; charset=utf-8"),
        )
        .await;
        assert!(text.starts_with("# Hi\n"));
        assert!(text.contains("Hello"));
        assert!(text.contains("------"));
        assert!(text.contains("gateway-rs"));
    }

    #[tokio::test]
    async fn test_output_meta_is_utf8_gemtext() {
        let out = HtmlTransformer::new()
            .transform(
                &request(),
                html_response(b"<html><body>x</body></html>", None),
            )
            .await
            .unwrap();
        assert_eq!(out.meta, "text/gemini;charset=utf-8");
    }

    #[tokio::test]
    async fn test_header_charset_decodes_latin1() {
        // 0xE9 is e-acute in ISO-8859-1 and invalid UTF-8
        let bytes = b"<html><body><p>caf\xe9</p></body></html>";
        let text = transform_to_text(bytes, Some("text/html; charset=iso-8859-1")).await;
        assert!(text.contains("café"));
    }

    #[tokio::test]
    async fn test_sniffed_charset_decodes() {
        let bytes =
            b"<html><head><meta charset=\"iso-8859-1\"></head><body><p>caf\xe9</p></body></html>";
        let text = transform_to_text(bytes, Some("text/html")).await;
        assert!(text.contains("café"));
    }

    #[tokio::test]
    async fn test_unknown_sniffed_charset_fails_with_name() {
        let bytes = b"<html><head><meta charset=\"bogus-9999\"></head><body>x</body></html>";
        let err = HtmlTransformer::new()
            .transform(&request(), html_response(bytes, Some("text/html")))
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::UnsupportedCharset(ref c) if c == "bogus-9999"));
    }

    #[tokio::test]
    async fn test_detected_extras() {
        let html = br#"<html><head>
<title>A Post</title>
<link rel="alternate" type="application/rss+xml" href="/feed.xml">
<meta property="og:image" content="https://example.com/hero.png">
<meta property="og:type" content="article">
</head><body><p>Body text</p></body></html>"#;
        let text = transform_to_text(html, Some("text/html; charset=utf-8")).await;
        assert!(text.contains("=> https://example.com/feed.xml RSS/Atom feed detected"));
        assert!(text.contains("=> https://example.com/hero.png Featured image"));
        assert!(text.contains("Article detected"));
        assert!(text.contains("gemini://gemi.dev/cgi-bin/waffle.cgi/article?"));
    }

    #[tokio::test]
    async fn test_links_become_link_lines() {
        let html = br#"<html><body><p>See <a href="/docs">the docs</a> for more.</p></body></html>"#;
        let text = transform_to_text(html, None).await;
        assert!(text.contains("See the docs for more."));
        assert!(text.contains("=> https://example.com/docs the docs"));
    }

    #[tokio::test]
    async fn test_script_and_style_are_dropped() {
        let html = br#"<html><body><script>var x = "secret";</script><style>p{}</style><p>visible</p></body></html>"#;
        let text = transform_to_text(html, None).await;
        assert!(text.contains("visible"));
        assert!(!text.contains("secret"));
    }

    #[tokio::test]
    async fn test_headings_and_lists() {
        let html = br#"<html><body><h1>Top</h1><h2>Sub</h2><ul><li>one</li><li>two</li></ul></body></html>"#;
        let text = transform_to_text(html, None).await;
        assert!(text.contains("# Top"));
        assert!(text.contains("## Sub"));
        assert!(text.contains("* one"));
        assert!(text.contains("* two"));
    }
}
