//! Gemini response writer
//!
//! Serializes a response over an established connection: one status line,
//! then body bytes. Tracks bytes sent for access logging.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::source::{status, Body};

/// Chunk size for stream copies to the client
const COPY_CHUNK_SIZE: usize = 32 * 1024;

/// Writer for a single Gemini response.
///
/// The status line is write-once: the first status write is final, and a
/// second one is a programming error (debug-asserted, not a runtime check).
pub struct GeminiResponse<'a, S: AsyncWrite + Unpin> {
    stream: &'a mut S,
    status: Option<u8>,
    meta: String,
    bytes_sent: u64,
}

impl<'a, S: AsyncWrite + Unpin> GeminiResponse<'a, S> {
    pub fn new(stream: &'a mut S) -> Self {
        Self {
            stream,
            status: None,
            meta: String::new(),
            bytes_sent: 0,
        }
    }

    /// Status code written so far, if any
    pub fn status(&self) -> Option<u8> {
        self.status
    }

    /// Meta field of the written status line
    pub fn meta(&self) -> &str {
        &self.meta
    }

    /// Number of body+header bytes sent to the client
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub async fn success(&mut self, mime_type: &str) -> Result<()> {
        self.write_status_line(status::SUCCESS, mime_type).await
    }

    pub async fn redirect(&mut self, url: &str) -> Result<()> {
        self.write_status_line(status::REDIRECT_TEMPORARY, url).await
    }

    pub async fn missing(&mut self, msg: &str) -> Result<()> {
        self.write_status_line(status::NOT_FOUND, msg).await
    }

    pub async fn gone(&mut self, msg: &str) -> Result<()> {
        self.write_status_line(status::GONE, msg).await
    }

    pub async fn proxy_refused(&mut self, kind: &str) -> Result<()> {
        let meta = format!("Will not proxy requests for other {}", kind);
        self.write_status_line(status::PROXY_REFUSED, &meta).await
    }

    pub async fn bad_request(&mut self, msg: &str) -> Result<()> {
        self.write_status_line(status::BAD_REQUEST, msg).await
    }

    pub async fn error(&mut self, msg: &str) -> Result<()> {
        self.write_status_line(status::TEMPORARY_FAILURE, msg).await
    }

    /// Write the status line. Must be called exactly once per response.
    pub async fn write_status_line(&mut self, status: u8, meta: &str) -> Result<()> {
        debug_assert!(self.status.is_none(), "status line written twice");
        self.status = Some(status);
        self.meta = meta.to_string();
        let line = format!("{} {}\r\n", status, meta);
        self.write_bytes(line.as_bytes()).await
    }

    /// Write raw body bytes, counting them
    pub async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.bytes_sent += data.len() as u64;
        Ok(())
    }

    /// Copy an entire body to the client in fixed-size chunks until
    /// exhausted, consuming it
    pub async fn copy_from(&mut self, body: Body) -> Result<()> {
        match body {
            Body::Bytes(bytes) => {
                for chunk in bytes.chunks(COPY_CHUNK_SIZE) {
                    self.write_bytes(chunk).await?;
                }
            }
            Body::Remote(mut response) => {
                while let Some(chunk) = response.chunk().await? {
                    self.write_bytes(&chunk).await?;
                }
            }
        }
        self.stream.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_line_format() {
        let mut out: Vec<u8> = Vec::new();
        let mut resp = GeminiResponse::new(&mut out);
        resp.success("text/gemini").await.unwrap();
        assert_eq!(out, b"20 text/gemini\r\n");
    }

    #[tokio::test]
    async fn test_bytes_are_counted() {
        let mut out: Vec<u8> = Vec::new();
        let mut resp = GeminiResponse::new(&mut out);
        resp.bad_request("Missing URL").await.unwrap();
        assert_eq!(resp.status(), Some(59));
        assert_eq!(resp.meta(), "Missing URL");
        assert_eq!(resp.bytes_sent(), "59 Missing URL\r\n".len() as u64);
    }

    #[tokio::test]
    async fn test_copy_from_chunks_large_buffers() {
        let mut out: Vec<u8> = Vec::new();
        let payload = vec![0xA5u8; COPY_CHUNK_SIZE * 2 + 17];
        {
            let mut resp = GeminiResponse::new(&mut out);
            resp.success("application/octet-stream").await.unwrap();
            let header_len = resp.bytes_sent();
            resp.copy_from(Body::Bytes(payload.clone())).await.unwrap();
            assert_eq!(resp.bytes_sent() - header_len, payload.len() as u64);
        }
        assert!(out.ends_with(&payload));
    }

    #[tokio::test]
    async fn test_status_family_constructors() {
        let mut out: Vec<u8> = Vec::new();
        let mut resp = GeminiResponse::new(&mut out);
        resp.redirect("gemini://example.com/").await.unwrap();
        assert_eq!(out, b"30 gemini://example.com/\r\n");

        let mut out: Vec<u8> = Vec::new();
        let mut resp = GeminiResponse::new(&mut out);
        resp.gone("Gone").await.unwrap();
        assert_eq!(out, b"52 Gone\r\n");

        let mut out: Vec<u8> = Vec::new();
        let mut resp = GeminiResponse::new(&mut out);
        resp.missing("File not found").await.unwrap();
        assert_eq!(out, b"51 File not found\r\n");
    }

    #[tokio::test]
    async fn test_proxy_refused_message() {
        let mut out: Vec<u8> = Vec::new();
        let mut resp = GeminiResponse::new(&mut out);
        resp.proxy_refused("protocols").await.unwrap();
        assert_eq!(out, b"53 Will not proxy requests for other protocols\r\n");
    }
}
