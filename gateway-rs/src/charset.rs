//! Charset parsing and lookup
//!
//! Central place for turning declared or sniffed charset labels into
//! decoders, so the requestor (eager validation) and the HTML transformer
//! (sniffing) agree on what is decodable.

use encoding_rs::Encoding;
use mime::Mime;
use regex::Regex;
use std::sync::OnceLock;

/// Trim whitespace and the quotes some servers wrap around charset values
pub fn clean_label(label: &str) -> &str {
    label.trim().trim_matches(|c| c == '"' || c == '\'')
}

/// Look up a decoder for a charset label, after cleaning it
pub fn encoding_for_label(label: &str) -> Option<&'static Encoding> {
    let label = clean_label(label);
    if label.is_empty() {
        return None;
    }
    Encoding::for_label(label.as_bytes())
}

/// The charset declared in a parsed Content-Type header, if any
pub fn declared_charset(content_type: &Mime) -> Option<String> {
    content_type
        .get_param(mime::CHARSET)
        .map(|cs| clean_label(cs.as_str()).to_string())
        .filter(|cs| !cs.is_empty())
}

fn meta_charset_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)charset\s*=\s*["']?([a-zA-Z0-9_.:\-]+)"#).unwrap())
}

/// Sniff a charset label from the document itself: a BOM wins, then the
/// first `charset=` declaration in the leading bytes (meta tags live there).
pub fn sniff_declared_charset(bytes: &[u8]) -> Option<String> {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return Some(encoding.name().to_string());
    }

    let head = &bytes[..bytes.len().min(1024)];
    let head = String::from_utf8_lossy(head);
    meta_charset_re()
        .captures(&head)
        .map(|caps| caps[1].to_string())
}
