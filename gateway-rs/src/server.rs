//! Connection handling and request framing
//!
//! Accepts Gemini connections, performs the TLS handshake, reads and
//! validates the single request line, and delegates to the proxy core.
//! One failing connection never affects another or the accept loop, every
//! connection is closed exactly once, and exactly one access-log record is
//! written per connection regardless of outcome.

use chrono::Utc;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};
use url::Url;

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::logging::{sanitize, AccessRecord, W3cLogger};
use crate::proxy::ProxyCore;
use crate::response::GeminiResponse;
use crate::source::Request;
use crate::tls::TlsManager;

/// Maximum request size in bytes, CRLF included
const MAX_REQUEST_SIZE: usize = 2048;

/// How long a client gets to deliver its request line
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Gemini gateway server
pub struct GatewayServer {
    config: GatewayConfig,
    proxy: Arc<ProxyCore>,
    acceptor: TlsAcceptor,
    access_log: Arc<W3cLogger>,
}

impl GatewayServer {
    /// Create a new gateway server. An unusable TLS certificate fails here,
    /// before anything listens.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;

        let tls_manager = TlsManager::new(config.tls.clone(), config.server.hostname.clone());
        let acceptor = tls_manager.build_acceptor()?;
        let proxy = Arc::new(ProxyCore::new(&config)?);

        Ok(Self {
            config,
            proxy,
            acceptor,
            access_log: Arc::new(W3cLogger::stdout()),
        })
    }

    /// Bind and serve forever
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.server.listen_addr).await?;
        let addr = listener.local_addr()?;
        for line in launch_banner(&self.config.server.hostname, addr) {
            info!("{}", line);
        }
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener. The accept loop
    /// never blocks on request processing.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    let proxy = self.proxy.clone();
                    let acceptor = self.acceptor.clone();
                    let access_log = self.access_log.clone();
                    let mask_ips = self.config.server.mask_client_ips;

                    tokio::spawn(async move {
                        handle_connection(proxy, acceptor, access_log, mask_ips, socket, addr)
                            .await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Startup banner lines, emitted once when the listener is bound
fn launch_banner(hostname: &str, addr: SocketAddr) -> [String; 3] {
    [
        format!("gateway-rs v{}", env!("CARGO_PKG_VERSION")),
        format!("Hostname: {}", hostname),
        format!("Listening for Gemini requests on {} (port {})", addr, addr.port()),
    ]
}

/// Process one connection start to finish. Infallible by design: every
/// failure path degrades to a logged record and a closed socket.
async fn handle_connection(
    proxy: Arc<ProxyCore>,
    acceptor: TlsAcceptor,
    access_log: Arc<W3cLogger>,
    mask_ips: bool,
    socket: TcpStream,
    addr: SocketAddr,
) {
    let received = Utc::now();
    let mut record = AccessRecord {
        date: AccessRecord::format_date(received),
        time: AccessRecord::format_time(received),
        remote_ip: if mask_ips {
            "-".to_string()
        } else {
            addr.ip().to_string()
        },
        ..Default::default()
    };

    let mut stream = match acceptor.accept(socket).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!("TLS handshake failed from {}: {}", addr, e);
            record.time_taken = AccessRecord::compute_time_taken(received, Utc::now());
            access_log.log_access(&record);
            return;
        }
    };

    let raw_request = match timeout(REQUEST_READ_TIMEOUT, read_request_line(&mut stream)).await {
        Ok(Ok(raw)) => Some(raw),
        Ok(Err(framing)) => {
            // malformed framing gets a 59 before the connection closes
            let mut response = GeminiResponse::new(&mut stream);
            let _ = response.bad_request(&framing.to_string()).await;
            record.status_code = "59".to_string();
            record.meta = framing.to_string();
            record.sent_bytes = response.bytes_sent().to_string();
            None
        }
        Err(_) => {
            // client too slow: nothing was promised, nothing is sent
            debug!("request read from {} timed out", addr);
            None
        }
    };

    if let Some(raw) = raw_request {
        let mut response = GeminiResponse::new(&mut stream);
        match validate_request(&raw, &proxy) {
            Ok(url) => {
                let request = Request {
                    url: url.clone(),
                    remote_addr: record.remote_ip.clone(),
                };
                proxy.proxy_request(&request, &mut response).await;
                record.url = url.to_string();
            }
            Err(failure) => {
                let _ = match failure {
                    ValidationFailure::UnsupportedProtocol => {
                        response.proxy_refused("protocols").await
                    }
                    other => response.bad_request(other.message()).await,
                };
                let cleaned = sanitize(&raw, false);
                if !cleaned.is_empty() {
                    record.url = cleaned;
                }
            }
        }
        if let Some(status) = response.status() {
            record.status_code = status.to_string();
        }
        if !response.meta().is_empty() {
            record.meta = sanitize(response.meta(), true);
        }
        record.sent_bytes = response.bytes_sent().to_string();
    }

    record.time_taken = AccessRecord::compute_time_taken(received, Utc::now());
    access_log.log_access(&record);

    if let Err(e) = stream.shutdown().await {
        debug!("error closing connection from {}: {}", addr, e);
    }
}

/// Framing failures while reading the request line
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FramingError {
    MissingLf,
    Overflow,
    UrlTooLong,
    Encoding,
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingError::MissingLf => {
                write!(f, "Invalid request. Request line missing LF after CR")
            }
            FramingError::Overflow => write!(
                f,
                "Invalid request. Did not find CRLF within {} bytes of request line",
                MAX_REQUEST_SIZE
            ),
            FramingError::UrlTooLong => write!(
                f,
                "Invalid request. URL exceeds {} bytes",
                MAX_REQUEST_SIZE - 2
            ),
            FramingError::Encoding => write!(f, "Invalid request. Request line is not valid UTF-8"),
        }
    }
}

/// Read the request line byte by byte.
///
/// A single buffered read cannot be assumed to contain the whole request
/// when clients are slow or adversarial, so bytes are accumulated one at a
/// time until CRLF, an independent overflow limit, or EOF.
pub(crate) async fn read_request_line<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> std::result::Result<String, FramingError> {
    let mut buffer: Vec<u8> = Vec::with_capacity(MAX_REQUEST_SIZE);
    let mut read_count = 0usize;

    loop {
        let byte = match stream.read_u8().await {
            Ok(byte) => byte,
            // EOF (or a dead peer): validate whatever accumulated
            Err(_) => break,
        };

        if byte == b'\r' {
            // the protocol requires a LF next
            match stream.read_u8().await {
                Ok(b'\n') => break,
                _ => return Err(FramingError::MissingLf),
            }
        }

        read_count += 1;
        if read_count > MAX_REQUEST_SIZE {
            return Err(FramingError::Overflow);
        }
        buffer.push(byte);
    }

    // the URL itself may not be longer than the max minus the CRLF
    if buffer.len() > MAX_REQUEST_SIZE - 2 {
        return Err(FramingError::UrlTooLong);
    }

    String::from_utf8(buffer).map_err(|_| FramingError::Encoding)
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ValidationFailure {
    MissingUrl,
    InvalidUrl,
    RelativeUrl,
    UnsupportedProtocol,
}

impl ValidationFailure {
    fn message(&self) -> &'static str {
        match self {
            ValidationFailure::MissingUrl => "Missing URL",
            ValidationFailure::InvalidUrl => "Invalid URL",
            ValidationFailure::RelativeUrl => "Relative URLs not allowed",
            ValidationFailure::UnsupportedProtocol => "Unsupported protocol",
        }
    }
}

/// Validate the raw request line.
///
/// The order of these checks, and the status codes they produce, is fixed:
/// conformance checkers depend on it.
pub(crate) fn validate_request(
    raw: &str,
    proxy: &ProxyCore,
) -> std::result::Result<Url, ValidationFailure> {
    if raw.is_empty() {
        return Err(ValidationFailure::MissingUrl);
    }

    let url = match Url::parse(raw) {
        Ok(url) => url,
        // the parser reports a missing base for anything without a valid
        // scheme; only scheme-less lines count as relative, the rest are
        // plain invalid
        Err(url::ParseError::RelativeUrlWithoutBase) if !raw.contains("://") => {
            return Err(ValidationFailure::RelativeUrl)
        }
        Err(_) => return Err(ValidationFailure::InvalidUrl),
    };

    // guard against loose parsers treating a bare path as absolute
    if !raw.contains("://") {
        return Err(ValidationFailure::RelativeUrl);
    }

    if !proxy.supports_protocol(&url) {
        return Err(ValidationFailure::UnsupportedProtocol);
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read(bytes: &[u8]) -> std::result::Result<String, FramingError> {
        let mut reader = bytes;
        read_request_line(&mut reader).await
    }

    #[tokio::test]
    async fn test_read_simple_request() {
        assert_eq!(
            read(b"gemini://example.com/\r\n").await.unwrap(),
            "gemini://example.com/"
        );
    }

    #[tokio::test]
    async fn test_cr_without_lf_fails() {
        assert_eq!(
            read(b"https://example.com/\rX").await.unwrap_err(),
            FramingError::MissingLf
        );
        // CR at EOF is just as malformed
        assert_eq!(
            read(b"https://example.com/\r").await.unwrap_err(),
            FramingError::MissingLf
        );
    }

    #[tokio::test]
    async fn test_overflow_without_crlf() {
        let big = vec![b'a'; 3000];
        assert_eq!(read(&big).await.unwrap_err(), FramingError::Overflow);
    }

    #[tokio::test]
    async fn test_url_too_long() {
        let mut line = vec![b'a'; MAX_REQUEST_SIZE - 1]; // 2047: fits the overflow limit
        line.extend_from_slice(b"\r\n");
        assert_eq!(read(&line).await.unwrap_err(), FramingError::UrlTooLong);
    }

    #[tokio::test]
    async fn test_longest_legal_url_accepted() {
        let mut line = vec![b'a'; MAX_REQUEST_SIZE - 2];
        line.extend_from_slice(b"\r\n");
        assert_eq!(read(&line).await.unwrap().len(), MAX_REQUEST_SIZE - 2);
    }

    #[tokio::test]
    async fn test_invalid_utf8_fails() {
        assert_eq!(
            read(b"\xff\xfe\r\n").await.unwrap_err(),
            FramingError::Encoding
        );
    }

    #[tokio::test]
    async fn test_eof_yields_partial_line() {
        // a peer that closes early still gets its bytes validated
        assert_eq!(read(b"https://example.com/").await.unwrap(), "https://example.com/");
        assert_eq!(read(b"").await.unwrap(), "");
    }

    fn proxy() -> ProxyCore {
        ProxyCore::new(&GatewayConfig::development()).unwrap()
    }

    #[test]
    fn test_validation_order() {
        let proxy = proxy();

        assert_eq!(
            validate_request("", &proxy).unwrap_err(),
            ValidationFailure::MissingUrl
        );
        assert_eq!(
            validate_request("ht!tp://example.com/", &proxy).unwrap_err(),
            ValidationFailure::InvalidUrl
        );
        // unparseable beats relative even when a separator is present
        assert_eq!(
            validate_request("://example.com/", &proxy).unwrap_err(),
            ValidationFailure::InvalidUrl
        );
        assert_eq!(
            validate_request("example.com/page", &proxy).unwrap_err(),
            ValidationFailure::RelativeUrl
        );
        assert_eq!(
            validate_request("/", &proxy).unwrap_err(),
            ValidationFailure::RelativeUrl
        );
        assert_eq!(
            validate_request("gopher://example.com/", &proxy).unwrap_err(),
            ValidationFailure::UnsupportedProtocol
        );
        assert!(validate_request("https://example.com/", &proxy).is_ok());
    }

    #[test]
    fn test_launch_banner_names_host_and_port() {
        let addr: SocketAddr = "127.0.0.1:1965".parse().unwrap();
        let lines = launch_banner("gw.example.com", addr);
        assert!(lines[0].contains(env!("CARGO_PKG_VERSION")));
        assert!(lines[1].contains("gw.example.com"));
        assert!(lines[2].contains("port 1965"));
    }

    #[test]
    fn test_validation_and_dispatch_agree() {
        let proxy = proxy();
        for raw in ["http://example.com/", "https://example.com/a?b=c"] {
            let url = validate_request(raw, &proxy).unwrap();
            assert!(proxy.supports_protocol(&url));
        }
    }
}
