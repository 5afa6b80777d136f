//! HTTP-to-WebSocket upgrade negotiation.
//!
//! The relay reads a request line and header lines itself (no HTTP library),
//! so this module only deals with already-split lines:
//!
//! 1. [`HandshakeRequest::new`] with the request line
//! 2. [`HandshakeRequest::push_header_line`] for each line up to the blank one
//! 3. [`HandshakeRequest::negotiate`] to decide between upgrade and plain HTTP

use std::collections::HashMap;

use base64::prelude::*;
use sha1::{Digest, Sha1};

/// GUID appended to the client key before hashing (RFC 6455 section 1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Header carrying the client nonce.
pub const SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";

/// Derive the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Request method, as far as the relay cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// `GET`, the only method that may upgrade.
    Get,
    /// `HEAD`, answered with fallback headers and no body.
    Head,
    /// Anything else, including lines that are not HTTP at all.
    Other(String),
}

impl Method {
    /// Parse the method token at the start of a request line.
    pub fn from_request_line(line: &str) -> Self {
        match line.split_whitespace().next() {
            Some("GET") => Self::Get,
            Some("HEAD") => Self::Head,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Other(String::new()),
        }
    }

    /// Whether headers are worth reading for this method.
    pub fn is_http_read(&self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }
}

/// Outcome of negotiating a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Negotiation {
    /// Switch to WebSocket framing, answering with this accept key.
    Upgrade {
        /// Value for `Sec-WebSocket-Accept`.
        accept_key: String,
    },
    /// Serve the fallback page and close.
    PlainHttp {
        /// Omit the body (`HEAD` requests).
        head_only: bool,
    },
}

/// The first request read off a new connection.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    request_line: String,
    method: Method,
    /// Header values keyed by lower-cased name; later lines overwrite earlier.
    headers: HashMap<String, String>,
}

impl HandshakeRequest {
    /// Start a request from its first line.
    pub fn new(request_line: impl Into<String>) -> Self {
        let request_line = request_line.into();
        let method = Method::from_request_line(&request_line);
        Self {
            request_line,
            method,
            headers: HashMap::new(),
        }
    }

    /// The raw request line.
    pub fn request_line(&self) -> &str {
        &self.request_line
    }

    /// The parsed method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Record one header line. Lines without a `:` separator are ignored.
    pub fn push_header_line(&mut self, line: &str) {
        if let Some((name, value)) = line.split_once(':') {
            let _ = self
                .headers
                .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    /// Look up a header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Number of distinct header names recorded.
    pub fn header_count(&self) -> usize {
        self.headers.len()
    }

    /// The client's `Sec-WebSocket-Key`, if sent.
    pub fn websocket_key(&self) -> Option<&str> {
        self.header(SEC_WEBSOCKET_KEY)
    }

    /// Decide how to answer this request.
    pub fn negotiate(&self) -> Negotiation {
        match (&self.method, self.websocket_key()) {
            (Method::Get, Some(key)) => Negotiation::Upgrade {
                accept_key: accept_key(key),
            },
            (method, _) => Negotiation::PlainHttp {
                head_only: *method == Method::Head,
            },
        }
    }
}

/// The `101 Switching Protocols` response for an accepted upgrade.
pub fn switching_protocols_response(accept_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept_key}\r\n\r\n"
    )
}

/// A `200 OK` HTML response that closes the connection.
///
/// `Content-Length` always reflects `body`, even when `head_only` drops it.
pub fn html_response(body: &str, head_only: bool) -> String {
    let mut response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/html; charset=UTF-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n",
        body.len()
    );
    if !head_only {
        response.push_str(body);
    }
    response
}
