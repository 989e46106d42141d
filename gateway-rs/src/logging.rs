//! W3C extended-log style access logging
//!
//! One record per connection, on every outcome path. Untrusted request
//! text is sanitized before it reaches a log field.

use chrono::{DateTime, Utc};
use std::io::Write;
use std::sync::Mutex;

/// A single access-log record. Fields not known for a given outcome stay "-".
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub date: String,
    pub time: String,
    pub remote_ip: String,
    pub url: String,
    pub status_code: String,
    pub meta: String,
    pub sent_bytes: String,
    pub time_taken: String,
}

impl Default for AccessRecord {
    fn default() -> Self {
        Self {
            date: "-".to_string(),
            time: "-".to_string(),
            remote_ip: "-".to_string(),
            url: "-".to_string(),
            status_code: "-".to_string(),
            meta: "-".to_string(),
            sent_bytes: "-".to_string(),
            time_taken: "-".to_string(),
        }
    }
}

impl AccessRecord {
    pub fn format_date(dt: DateTime<Utc>) -> String {
        dt.format("%Y-%m-%d").to_string()
    }

    pub fn format_time(dt: DateTime<Utc>) -> String {
        dt.format("%H:%M:%S").to_string()
    }

    pub fn compute_time_taken(received: DateTime<Utc>, completed: DateTime<Utc>) -> String {
        completed
            .signed_duration_since(received)
            .num_milliseconds()
            .to_string()
    }
}

/// Sanitize untrusted input before it goes into a log field.
///
/// ASCII printable characters are preserved; control characters, quotes and
/// everything non-ASCII become `*`. Spaces are masked too when
/// `allow_space` is false, so a raw request can never fake extra fields.
pub fn sanitize(s: &str, allow_space: bool) -> String {
    s.chars()
        .map(|c| {
            if c == ' ' {
                if allow_space {
                    c
                } else {
                    '*'
                }
            } else if c.is_ascii() && !c.is_ascii_control() && c != '"' {
                c
            } else {
                '*'
            }
        })
        .collect()
}

/// Writes access records in W3C extended log format, emitting the header
/// block before the first record. Safe for concurrent writers.
pub struct W3cLogger {
    inner: Mutex<LoggerInner>,
}

struct LoggerInner {
    out: Box<dyn Write + Send>,
    wrote_header: bool,
}

impl W3cLogger {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Mutex::new(LoggerInner {
                out,
                wrote_header: false,
            }),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn log_access(&self, record: &AccessRecord) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if !inner.wrote_header {
            inner.wrote_header = true;
            let _ = writeln!(inner.out, "#Version: 1.0");
            let _ = writeln!(
                inner.out,
                "#Date: {}",
                Utc::now().format("%d-%b-%Y %H:%M:%S")
            );
            let _ = writeln!(
                inner.out,
                "#Fields: date time c-ip cs-uri sc-status x-meta sc-bytes sc-time-taken"
            );
        }
        let _ = writeln!(
            inner.out,
            "{} {} {} {} {} \"{}\" {} {}",
            record.date,
            record.time,
            record.remote_ip,
            record.url,
            record.status_code,
            record.meta,
            record.sent_bytes,
            record.time_taken
        );
        let _ = inner.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_sanitize_preserves_printable_ascii() {
        assert_eq!(
            sanitize("gemini://example.com/a-b_c?x=1", true),
            "gemini://example.com/a-b_c?x=1"
        );
    }

    #[test]
    fn test_sanitize_masks_control_quotes_and_unicode() {
        assert_eq!(sanitize("a\"b\nc\u{263a}d", true), "a*b*c*d");
    }

    #[test]
    fn test_sanitize_space_masking() {
        assert_eq!(sanitize("a b", true), "a b");
        assert_eq!(sanitize("a b", false), "a*b");
    }

    #[test]
    fn test_header_written_once() {
        // Shared buffer so the test can inspect what the logger wrote
        #[derive(Clone)]
        struct SharedBuf(Arc<Mutex<Vec<u8>>>);
        impl Write for SharedBuf {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buf = SharedBuf(Arc::new(Mutex::new(Vec::new())));
        let logger = W3cLogger::new(Box::new(buf.clone()));
        logger.log_access(&AccessRecord::default());
        logger.log_access(&AccessRecord {
            status_code: "20".to_string(),
            ..Default::default()
        });

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.matches("#Fields:").count(), 1);
        assert!(text.contains("- - - - - \"-\" - -"));
        assert!(text.contains(" 20 \"-\" - -"));
    }
}
