//! Opening handshake, client side (RFC 6455 Section 4).
//!
//! The client writes an HTTP/1.1 upgrade request carrying a fresh nonce,
//! reads the response head off the stream and checks it against the nonce
//! and the offered subprotocols. Bytes the server sent after the head belong
//! to the frame stream and are returned as `leftover`.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::transport::Target;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Headers the handshake writes itself; the application may not set them.
const MANAGED_HEADERS: [&str; 7] = [
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-protocol",
    "sec-websocket-extensions",
];

/// Response headers that must appear at most once.
const SECURITY_HEADERS: [&str; 5] = [
    "upgrade",
    "connection",
    "sec-websocket-accept",
    "sec-websocket-protocol",
    "sec-websocket-extensions",
];

/// Parse header lines into a map keyed by lowercase name.
///
/// Stops at the first empty line. Names listed in `unique` may not repeat.
fn parse_headers<'a, I>(lines: I, unique: &[&str]) -> Result<HashMap<String, String>>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers: HashMap<String, String> = HashMap::new();

    for line in lines {
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Error::Handshake(format!("Malformed header line: {line}")));
        };
        let name_lower = name.trim().to_ascii_lowercase();
        if unique.contains(&name_lower.as_str()) && headers.contains_key(&name_lower) {
            return Err(Error::Handshake(format!("Duplicate header: {}", name.trim())));
        }
        headers.insert(name_lower, value.trim().to_string());
    }

    Ok(headers)
}

/// Reject header values that would split the request.
fn validate_header_value(header_name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHeaderValue {
            header: header_name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

fn validate_header_name(name: &str) -> Result<()> {
    let is_token = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != b':');
    if !is_token {
        return Err(Error::InvalidHeaderValue {
            header: name.to_string(),
            reason: "not a valid header name".to_string(),
        });
    }
    if MANAGED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
        return Err(Error::InvalidHeaderValue {
            header: name.to_string(),
            reason: "set by the handshake".to_string(),
        });
    }
    Ok(())
}

/// Computes the Sec-WebSocket-Accept value for a Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsconn::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    BASE64.encode(hash)
}

/// Base64 of 16 fresh random bytes.
///
/// # Errors
///
/// Returns `Error::Io` if the random source is unavailable.
pub fn generate_key() -> Result<String> {
    let mut nonce = [0u8; 16];
    getrandom::getrandom(&mut nonce)?;
    Ok(BASE64.encode(nonce))
}

/// Client upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// The request path (e.g., "/chat").
    pub path: String,
    /// The Host header value.
    pub host: String,
    /// The Sec-WebSocket-Key header value.
    pub key: String,
    /// The Origin header value (optional).
    pub origin: Option<String>,
    /// Offered subprotocols, in preference order.
    pub protocols: Vec<String>,
    /// Additional headers, written after the standard ones.
    pub headers: Vec<(String, String)>,
}

impl HandshakeRequest {
    /// Request for `target` with the given nonce.
    #[must_use]
    pub fn new(target: &Target, key: String) -> Self {
        Self {
            path: target.path.clone(),
            host: target.host_header(),
            key,
            origin: target.origin.clone(),
            protocols: target.subprotocols.clone(),
            headers: target.headers.clone(),
        }
    }

    /// Write the HTTP request to a buffer.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidHeaderValue` if any value contains CR/LF, a
    /// header name is malformed, or an extra header shadows one the
    /// handshake sets itself.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        validate_header_value("Request path", &self.path)?;
        validate_header_value("Host", &self.host)?;

        buf.extend_from_slice(format!("GET {} HTTP/1.1\r\n", self.path).as_bytes());
        buf.extend_from_slice(format!("Host: {}\r\n", self.host).as_bytes());
        buf.extend_from_slice(b"Upgrade: websocket\r\n");
        buf.extend_from_slice(b"Connection: Upgrade\r\n");
        buf.extend_from_slice(format!("Sec-WebSocket-Key: {}\r\n", self.key).as_bytes());
        buf.extend_from_slice(b"Sec-WebSocket-Version: 13\r\n");

        if let Some(ref origin) = self.origin {
            validate_header_value("Origin", origin)?;
            buf.extend_from_slice(format!("Origin: {origin}\r\n").as_bytes());
        }

        if !self.protocols.is_empty() {
            let joined = self.protocols.join(", ");
            validate_header_value("Sec-WebSocket-Protocol", &joined)?;
            buf.extend_from_slice(format!("Sec-WebSocket-Protocol: {joined}\r\n").as_bytes());
        }

        for (name, value) in &self.headers {
            validate_header_name(name)?;
            validate_header_value(name, value)?;
            buf.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }

        buf.extend_from_slice(b"\r\n");
        Ok(())
    }

    /// Parse an upgrade request, as a server would receive it.
    ///
    /// Used by loopback tooling that plays the server side.
    ///
    /// # Errors
    ///
    /// Returns `Error::Handshake` if the request line is not
    /// `GET <path> HTTP/1.1`, a required header is missing or wrong, or the
    /// version is not 13.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text =
            std::str::from_utf8(data).map_err(|_| Error::Handshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| Error::Handshake("Empty request".into()))?;
        let parts: Vec<&str> = request_line.split_whitespace().collect();
        if parts.len() != 3 || parts[0] != "GET" || parts[2] != "HTTP/1.1" {
            return Err(Error::Handshake(format!(
                "Invalid request line: {request_line}"
            )));
        }

        let unique = ["host", "upgrade", "connection", "sec-websocket-key", "sec-websocket-version"];
        let mut headers = parse_headers(lines, &unique)?;

        let mut take = |name: &str| {
            headers
                .remove(name)
                .ok_or_else(|| Error::Handshake(format!("Missing {name} header")))
        };

        let host = take("host")?;
        let key = take("sec-websocket-key")?;
        if !take("upgrade")?.eq_ignore_ascii_case("websocket") {
            return Err(Error::Handshake("Invalid Upgrade header".into()));
        }
        if !has_upgrade_token(&take("connection")?) {
            return Err(Error::Handshake("Invalid Connection header".into()));
        }
        if take("sec-websocket-version")? != "13" {
            return Err(Error::Handshake("Unsupported WebSocket version".into()));
        }

        let origin = headers.remove("origin");
        let protocols = headers
            .remove("sec-websocket-protocol")
            .map(|p| p.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        Ok(Self {
            path: parts[1].to_string(),
            host,
            key,
            origin,
            protocols,
            headers: headers.into_iter().collect(),
        })
    }
}

fn has_upgrade_token(connection: &str) -> bool {
    connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

/// Server's upgrade response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// HTTP status code.
    pub status: u16,
    /// The Sec-WebSocket-Accept value.
    pub accept: String,
    /// The selected Sec-WebSocket-Protocol (optional).
    pub protocol: Option<String>,
    /// Sec-WebSocket-Extensions values, if the server sent any.
    pub extensions: Vec<String>,
}

impl HandshakeResponse {
    /// Parse a response head (status line plus headers).
    ///
    /// # Errors
    ///
    /// Returns `Error::Handshake` if:
    /// - The data is not valid UTF-8 or the status line is malformed.
    /// - The status code is not `101`.
    /// - `Upgrade`, `Connection` or `Sec-WebSocket-Accept` is missing or wrong.
    /// - A security-relevant header appears twice.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text =
            std::str::from_utf8(data).map_err(|_| Error::Handshake("Invalid UTF-8".into()))?;
        let mut lines = text.lines();

        // "HTTP/1.1 101 Switching Protocols"
        let status_line = lines
            .next()
            .ok_or_else(|| Error::Handshake("Empty response".into()))?;
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        let status: u16 = parts
            .next()
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| Error::Handshake(format!("Malformed status line: {status_line}")))?;
        if !version.starts_with("HTTP/1.1") {
            return Err(Error::Handshake(format!("Expected HTTP/1.1, got {version}")));
        }
        if status != 101 {
            return Err(Error::Handshake(format!(
                "Expected 101 status, got: {status_line}"
            )));
        }

        let headers = parse_headers(lines, &SECURITY_HEADERS)?;

        let upgrade = headers
            .get("upgrade")
            .ok_or_else(|| Error::Handshake("Missing Upgrade header in response".into()))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(Error::Handshake(format!("Invalid Upgrade header: {upgrade}")));
        }

        let connection = headers
            .get("connection")
            .ok_or_else(|| Error::Handshake("Missing Connection header in response".into()))?;
        if !has_upgrade_token(connection) {
            return Err(Error::Handshake(format!(
                "Invalid Connection header: {connection}"
            )));
        }

        let accept = headers
            .get("sec-websocket-accept")
            .ok_or_else(|| Error::Handshake("Missing Sec-WebSocket-Accept header".into()))?
            .clone();

        let protocol = headers.get("sec-websocket-protocol").cloned();

        let extensions = headers
            .get("sec-websocket-extensions")
            .map(|e| e.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        Ok(Self {
            status,
            accept,
            protocol,
            extensions,
        })
    }

    /// Check the response against the request that produced it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Handshake` if the accept key does not match the nonce,
    /// the server picked a subprotocol that was not offered, or it enabled
    /// any extension.
    pub fn verify(&self, request: &HandshakeRequest) -> Result<()> {
        if self.accept != compute_accept_key(&request.key) {
            return Err(Error::Handshake("Sec-WebSocket-Accept mismatch".into()));
        }

        if let Some(ref protocol) = self.protocol {
            if !request.protocols.iter().any(|p| p == protocol) {
                return Err(Error::Handshake(format!(
                    "Server selected unrequested subprotocol: {protocol}"
                )));
            }
        }

        if !self.extensions.is_empty() {
            return Err(Error::Handshake(format!(
                "Server enabled unrequested extensions: {}",
                self.extensions.join(", ")
            )));
        }

        Ok(())
    }
}

/// Result of a successful opening handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Subprotocol the server selected.
    pub subprotocol: Option<String>,
    /// Bytes received after the response head; the start of the frame stream.
    pub leftover: Bytes,
}

/// Position just past the `\r\n\r\n` ending the head, if present.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Run the opening handshake over `stream`.
///
/// The exchange is bounded by `config.timeouts.handshake`.
///
/// # Errors
///
/// - `Error::Handshake` for any rejected response, an oversized head, or
///   EOF before the head completed
/// - `Error::InvalidHeaderValue` for request headers that cannot be sent
/// - `Error::Timeout` if the server does not answer in time
/// - `Error::Io` for transport failures
pub async fn negotiate<S>(stream: &mut S, target: &Target, config: &Config) -> Result<Negotiated>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    tokio::time::timeout(config.timeouts.handshake, exchange(stream, target, config))
        .await
        .map_err(|_| Error::Timeout("opening handshake"))?
}

async fn exchange<S>(stream: &mut S, target: &Target, config: &Config) -> Result<Negotiated>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let request = HandshakeRequest::new(target, generate_key()?);
    let mut out = Vec::with_capacity(256);
    request.write(&mut out)?;

    debug!(target = %target, "sending upgrade request");
    stream.write_all(&out).await?;
    stream.flush().await?;

    let max = config.limits.max_handshake_size;
    let mut buf = BytesMut::with_capacity(config.read_buffer_size.min(max).max(512));
    let head_end = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() >= max {
            return Err(Error::Handshake(
                Error::HandshakeTooLarge {
                    size: buf.len(),
                    max,
                }
                .to_string(),
            ));
        }
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(Error::Handshake(
                "Connection closed before handshake completed".into(),
            ));
        }
        trace!(buffered = buf.len(), "reading upgrade response");
    };

    config
        .limits
        .check_handshake_size(head_end)
        .map_err(|e| Error::Handshake(e.to_string()))?;

    let head = buf.split_to(head_end);
    let response = HandshakeResponse::parse(&head)?;
    response.verify(&request)?;

    debug!(
        target = %target,
        subprotocol = ?response.protocol,
        leftover = buf.len(),
        "handshake complete"
    );

    Ok(Negotiated {
        subprotocol: response.protocol,
        leftover: buf.freeze(),
    })
}
