//! RSS/Atom feed to gemtext transformer
//!
//! Accepts the proper feed mime types and, leniently, generic `text/xml`,
//! because plenty of servers mislabel their feeds. For the lenient case
//! the body is probed; XML that is not actually a feed passes through
//! untouched rather than failing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Write;
use url::Url;

use crate::error::TransformError;
use crate::source::{Body, Request, SourceResponse};

use super::text::{append_footer, create_url, normalize, readable_file_size, smart_truncate};
use super::Transformer;

/// Item descriptions are clipped to this many characters, on a whitespace
/// boundary
const MAX_DESCRIPTION_LENGTH: usize = 300;

/// How much of the body to probe for feed markers in the lenient case
const PROBE_LENGTH: usize = 250;

pub struct FeedTransformer;

impl FeedTransformer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for FeedTransformer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transformer for FeedTransformer {
    fn can_transform(&self, mime_type: &str) -> bool {
        mime_type.starts_with("application/rss+xml")
            || mime_type.starts_with("application/atom+xml")
            // mislabeled feeds: accept generic XML and probe the body
            || mime_type.starts_with("text/xml")
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
        let xml = String::from_utf8_lossy(&bytes).into_owned();

        if !is_really_feed(&xml) {
            // not a feed after all: pass the original content through
            response.body = Some(Body::Bytes(bytes));
            return Ok(response);
        }

        let summary = parse_feed(request, &xml)?;
        let rendered = render(&summary, xml.len() as u64);

        response.meta = "text/gemini".to_string();
        response.body = Some(Body::Bytes(rendered.into_bytes()));
        Ok(response)
    }
}

fn is_really_feed(xml: &str) -> bool {
    let end = xml
        .char_indices()
        .nth(PROBE_LENGTH)
        .map(|(i, _)| i)
        .unwrap_or(xml.len());
    let prefix = &xml[..end];
    prefix.contains("<rss") || prefix.contains("<feed")
}

struct FeedSummary {
    site_name: String,
    title: String,
    description: String,
    featured_image: Option<Url>,
    items: Vec<FeedItem>,
}

struct FeedItem {
    title: String,
    description: String,
    link: Option<String>,
    published: Option<DateTime<Utc>>,
    enclosure: Option<Enclosure>,
}

struct Enclosure {
    url: String,
    media_type: String,
    length: Option<u64>,
}

fn parse_feed(request: &Request, xml: &str) -> Result<FeedSummary, TransformError> {
    let feed = feed_rs::parser::parse(xml.as_bytes())
        .map_err(|e| TransformError::MalformedFeed(e.to_string()))?;

    // feed-rs has no site-name concept; fall back to the feed's own link
    // host, then the request host
    let site_name = feed
        .links
        .first()
        .and_then(|l| Url::parse(&l.href).ok())
        .and_then(|u| u.host_str().map(str::to_string))
        .or_else(|| request.url.host_str().map(str::to_string))
        .unwrap_or_else(|| "Feed".to_string());

    let items = feed
        .entries
        .iter()
        .map(|entry| FeedItem {
            title: entry
                .title
                .as_ref()
                .map(|t| normalize(&t.content))
                .unwrap_or_else(|| "(untitled)".to_string()),
            description: entry
                .summary
                .as_ref()
                .map(|t| normalize(&t.content))
                .or_else(|| {
                    entry
                        .content
                        .as_ref()
                        .and_then(|c| c.body.as_ref())
                        .map(|b| normalize(b))
                })
                .unwrap_or_default(),
            link: entry.links.first().map(|l| l.href.clone()),
            published: entry.published.or(entry.updated),
            enclosure: entry
                .media
                .iter()
                .flat_map(|m| m.content.iter())
                .find_map(|c| {
                    c.url.as_ref().map(|u| Enclosure {
                        url: u.to_string(),
                        media_type: c
                            .content_type
                            .as_ref()
                            .map(|ct| ct.to_string())
                            .unwrap_or_else(|| "audio".to_string()),
                        length: c.size,
                    })
                }),
        })
        .collect();

    Ok(FeedSummary {
        site_name,
        title: feed
            .title
            .as_ref()
            .map(|t| normalize(&t.content))
            .unwrap_or_default(),
        description: feed
            .description
            .as_ref()
            .map(|t| normalize(&t.content))
            .unwrap_or_default(),
        featured_image: feed
            .logo
            .as_ref()
            .or(feed.icon.as_ref())
            .and_then(|img| create_url(&img.uri)),
        items,
    })
}

fn render(feed: &FeedSummary, original_size: u64) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# {}", feed.site_name);
    let _ = writeln!(
        out,
        "This RSS/Atom feed has been automatically converted to gemtext."
    );
    let _ = writeln!(out, "## {}", feed.title);
    if feed.items.first().map(|i| i.enclosure.is_some()) == Some(true) {
        let _ = writeln!(out, "Audio feed detected");
    }
    if let Some(ref image) = feed.featured_image {
        let _ = writeln!(out, "=> {} Featured image", image);
    }
    if !feed.description.is_empty() {
        let _ = writeln!(out, ">{}", feed.description);
    }
    out.push('\n');

    for item in &feed.items {
        let _ = writeln!(out, "## {}", item.title);
        if let Some(published) = item.published {
            let _ = writeln!(out, "Published: {}", time_ago(published, Utc::now()));
        }
        let _ = writeln!(
            out,
            "> {}",
            smart_truncate(&item.description, MAX_DESCRIPTION_LENGTH)
        );
        match (&item.enclosure, &item.link) {
            (Some(enclosure), _) => {
                let _ = write!(out, "=> {} Audio file ({})", enclosure.url, enclosure.media_type);
                if let Some(length) = enclosure.length {
                    let _ = write!(out, " {}", readable_file_size(length));
                }
                out.push('\n');
            }
            (None, Some(link)) => {
                let _ = writeln!(out, "=> {} Read Entry", link);
            }
            (None, None) => {}
        }
    }

    let converted_size = out.len() as u64;
    append_footer(&mut out, original_size, converted_size);
    out
}

/// Render a publish time as a rough "time ago" string
fn time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(then);
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        return "just now".to_string();
    }
    if minutes < 60 {
        return plural(minutes, "minute");
    }
    let hours = elapsed.num_hours();
    if hours < 24 {
        return plural(hours, "hour");
    }
    let days = elapsed.num_days();
    if days < 31 {
        return plural(days, "day");
    }
    if days < 365 {
        return plural(days / 30, "month");
    }
    plural(days / 365, "year")
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", n, unit)
    }
}
