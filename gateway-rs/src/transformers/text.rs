//! Shared text helpers for the HTML and feed transformers

use regex::Regex;
use std::fmt::Write;
use std::sync::OnceLock;
use url::Url;

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").unwrap())
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

/// Normalize a free-text field found in an HTML or feed element:
/// entity-decode it, strip any remaining tags, and collapse runs of
/// whitespace (including newlines and tabs) into single spaces.
pub fn normalize(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    let stripped = tag_re().replace_all(&decoded, "");
    whitespace_re().replace_all(&stripped, " ").trim().to_string()
}

/// Best-effort absolute URL from a string. Relative URLs and `file:` URLs
/// are rejected.
pub fn create_url(s: &str) -> Option<Url> {
    let url = Url::parse(s).ok()?;
    if url.scheme() == "file" {
        return None;
    }
    Some(url)
}

/// Human-readable byte size ("1.5 KB", "3.2 MB")
pub fn readable_file_size(size: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];
    let mut size = size as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

/// Percentage saved by the conversion, as a display string
pub fn savings(new_size: u64, original_size: u64) -> String {
    if original_size == 0 {
        return "0.00%".to_string();
    }
    let pct = (1.0 - new_size as f64 / original_size as f64) * 100.0;
    format!("{:.2}%", pct)
}

/// Append the trailing footer block every converted document carries:
/// original size, converted size, and the size change with a qualitative
/// marker for whether the conversion actually shrank the content.
pub fn append_footer(body: &mut String, original_size: u64, converted_size: u64) {
    let marker = if converted_size < original_size {
        "(good)"
    } else {
        "(bad)"
    };
    let _ = write!(
        body,
        "\n\n------\nFetched and converted to gemtext by gateway-rs\nSize: {}. {} smaller than original: {} {}\n",
        readable_file_size(converted_size),
        savings(converted_size, original_size),
        readable_file_size(original_size),
        marker
    );
}

/// Truncate text at a whitespace boundary, never mid-word, appending an
/// ellipsis when anything was cut. Operates on characters, not bytes.
pub fn smart_truncate(text: &str, max_length: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_length {
        return text.to_string();
    }

    // Work backwards from the limit to find whitespace
    let mut break_point = max_length;
    while break_point > 0 && !chars[break_point].is_whitespace() {
        break_point -= 1;
    }

    // No whitespace anywhere: hard cut at the limit
    if break_point == 0 {
        break_point = max_length;
    }

    let truncated: String = chars[..break_point].iter().collect();
    format!("{}…", truncated.trim_end())
}
