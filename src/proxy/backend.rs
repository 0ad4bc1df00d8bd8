//! Backend servers and request forwarding.
//!
//! A [`Backend`] is one upstream server: it has a fixed address, answers a
//! liveness probe, and accepts forwarded client requests. [`HttpBackend`] is
//! the plain-HTTP implementation; the trait leaves room for other variants
//! without touching the selector.

use crate::config::{BackendConfig, Config};
use crate::http::request::Request;
use crate::http::response::{Response, ResponseBuilder, StatusCode};
use anyhow::{Context, Result};
use bytes::{Buf, BytesMut};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

/// Default buffer size for streaming
const BUFFER_SIZE: usize = 8192;

/// Upper bound on backend response headers
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// An upstream server the balancer can route to.
#[allow(async_fn_in_trait)]
pub trait Backend {
    /// The configured address, fixed at construction.
    fn address(&self) -> &Url;

    /// Probes the backend with a headers-only request.
    ///
    /// Returns true only if the probe completes without a transport error
    /// and the status code is below 400. Every call re-probes; there is no
    /// cached health state.
    async fn is_alive(&self) -> bool;

    /// Relays `request` to the backend and returns its response unchanged.
    ///
    /// No retry on failure; the error surfaces to the caller.
    async fn forward(&self, request: &Request) -> Result<Response>;
}

/// A plain HTTP backend reached over TCP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    url: Url,
    name: Option<String>,

    /// "host:port" dial target, resolved from the URL at construction
    addr: String,

    /// Host header value for outbound requests
    host_header: String,

    probe_timeout: Duration,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl HttpBackend {
    /// Creates a backend from configuration.
    ///
    /// Fails on a malformed or host-less URL; this is a fatal startup error
    /// for the process.
    pub fn new(backend: &BackendConfig, cfg: &Config) -> Result<Self> {
        let url = Url::parse(&backend.url)
            .with_context(|| format!("invalid backend URL {:?}", backend.url))?;

        let host = url
            .host_str()
            .with_context(|| format!("backend URL {:?} has no host", backend.url))?
            .to_string();

        let port = url.port().unwrap_or(match url.scheme() {
            "https" => 443,
            _ => 80,
        });

        let host_header = match url.port() {
            Some(p) => format!("{}:{}", host, p),
            None => host.clone(),
        };

        Ok(Self {
            addr: format!("{}:{}", host, port),
            host_header,
            name: backend.name.clone(),
            url,
            probe_timeout: cfg.probe_timeout(),
            connect_timeout: cfg.connect_timeout(),
            request_timeout: cfg.request_timeout(),
        })
    }

    /// Get a display name for the backend (name or URL)
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.url.as_str())
    }

    async fn connect(&self) -> Result<TcpStream> {
        timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .context("connection timeout")?
            .context("failed to connect to backend")
    }

    /// Sends a HEAD probe and returns the response status code.
    async fn probe(&self) -> Result<u16> {
        let exchange = async {
            let mut stream = TcpStream::connect(&self.addr)
                .await
                .context("failed to connect to backend")?;

            let head = format!(
                "HEAD / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
                self.host_header
            );
            stream.write_all(head.as_bytes()).await?;
            stream.flush().await?;

            read_status_line(&mut stream).await
        };

        timeout(self.probe_timeout, exchange)
            .await
            .context("probe timeout")?
    }

    /// Builds the raw request bytes sent to this backend.
    ///
    /// Method, path, query, and body pass through untouched. The Host header
    /// is rewritten to the backend authority and hop-by-hop headers are
    /// stripped.
    ///
    /// Note: public for integration testing purposes.
    pub fn build_forward_request(&self, request: &Request) -> Vec<u8> {
        let mut buffer = Vec::new();

        let path = if request.path.is_empty() {
            "/"
        } else {
            &request.path
        };

        buffer.extend_from_slice(
            format!("{} {} {}\r\n", request.method.as_str(), path, request.version).as_bytes(),
        );

        let mut headers = request.headers.clone();
        headers.insert("Host".to_string(), self.host_header.clone());

        // Remove hop-by-hop headers
        headers.remove("Keep-Alive");
        headers.remove("Proxy-Connection");
        headers.remove("Transfer-Encoding");
        headers.remove("Upgrade");

        // One request per backend connection
        headers.insert("Connection".to_string(), "close".to_string());

        for (key, value) in &headers {
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }

        buffer.extend_from_slice(b"\r\n");

        if !request.body.is_empty() {
            buffer.extend_from_slice(&request.body);
        }

        buffer
    }

    async fn exchange(&self, mut stream: TcpStream, request: &Request) -> Result<Response> {
        let request_bytes = self.build_forward_request(request);
        stream.write_all(&request_bytes).await?;
        stream.flush().await?;

        tracing::trace!(backend = self.display_name(), "Request sent to backend");

        read_http_response(&mut stream).await
    }
}

impl Backend for HttpBackend {
    fn address(&self) -> &Url {
        &self.url
    }

    async fn is_alive(&self) -> bool {
        match self.probe().await {
            Ok(status) => status < 400,
            Err(e) => {
                tracing::debug!(
                    backend = self.display_name(),
                    error = %e,
                    "Liveness probe failed"
                );
                false
            }
        }
    }

    async fn forward(&self, request: &Request) -> Result<Response> {
        let stream = self.connect().await?;

        tracing::trace!(backend = self.display_name(), "Connected to backend");

        timeout(self.request_timeout, self.exchange(stream, request))
            .await
            .context("request timeout")?
    }
}

/// Reads just the status line of a backend response.
async fn read_status_line(stream: &mut TcpStream) -> Result<u16> {
    let mut buffer = Vec::with_capacity(128);
    let mut chunk = [0u8; 256];

    loop {
        if let Some(line_end) = buffer.windows(2).position(|w| w == b"\r\n") {
            let line = std::str::from_utf8(&buffer[..line_end])
                .context("invalid UTF-8 in status line")?;
            return parse_status_code(line);
        }

        if buffer.len() > MAX_HEADER_BYTES {
            anyhow::bail!("status line too large");
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            anyhow::bail!("connection closed before status line received");
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

fn parse_status_code(status_line: &str) -> Result<u16> {
    let mut parts = status_line.splitn(3, ' ');
    let _version = parts.next().context("empty status line")?;
    parts
        .next()
        .context("status line missing code")?
        .parse()
        .context("invalid status code")
}

/// Reads a complete HTTP response from a backend stream.
async fn read_http_response(stream: &mut TcpStream) -> Result<Response> {
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        // Check if we've received complete headers (look for \r\n\r\n)
        if let Some(headers_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            let head_bytes = buffer.split_to(headers_end + 4);
            let (status, headers) = parse_response_head(&head_bytes)?;

            let body = read_response_body(stream, &mut buffer, &headers).await?;

            return Ok(ResponseBuilder::new(status)
                .headers(headers)
                .body(body)
                .build());
        }

        if buffer.len() > MAX_HEADER_BYTES {
            anyhow::bail!("response headers too large");
        }

        let n = stream.read_buf(&mut buffer).await?;
        if n == 0 {
            anyhow::bail!("connection closed before complete response received");
        }
    }
}

/// Parses the status line and headers of a backend response.
fn parse_response_head(head_bytes: &[u8]) -> Result<(StatusCode, HashMap<String, String>)> {
    let head_str = std::str::from_utf8(head_bytes)
        .context("invalid UTF-8 in response headers")?;

    let mut lines = head_str.lines();

    let status_line = lines.next().context("empty response")?;
    let status = StatusCode::from_u16(parse_status_code(status_line)?);

    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }

        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    Ok((status, headers))
}

/// Reads the response body, honoring Content-Length when present and
/// reading to connection close otherwise.
async fn read_response_body(
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
    headers: &HashMap<String, String>,
) -> Result<Vec<u8>> {
    let content_length = match headers.get("Content-Length") {
        Some(cl) => cl.parse::<usize>().unwrap_or(0),
        None => {
            // No Content-Length, read until the backend closes
            let mut body = buffer.to_vec();
            buffer.clear();
            loop {
                let n = stream.read_buf(buffer).await?;
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&buffer[..n]);
                buffer.clear();
            }
            return Ok(body);
        }
    };

    if content_length == 0 {
        return Ok(Vec::new());
    }

    let mut body = Vec::with_capacity(content_length);

    // Use whatever arrived along with the headers first
    let from_buffer = buffer.len().min(content_length);
    body.extend_from_slice(&buffer[..from_buffer]);
    buffer.advance(from_buffer);

    while body.len() < content_length {
        let remaining = content_length - body.len();
        let mut chunk = vec![0u8; remaining.min(BUFFER_SIZE)];
        let n = stream.read(&mut chunk).await?;

        if n == 0 {
            anyhow::bail!("connection closed before complete body received");
        }

        body.extend_from_slice(&chunk[..n]);
    }

    Ok(body)
}
