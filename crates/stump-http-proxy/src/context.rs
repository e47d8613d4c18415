//! Request/response wrappers handed through the pipeline.
//!
//! Each accepted HTTP exchange is flattened into a [`ProxyContext`] before
//! dispatch so that handlers, rules, and observers work against one plain
//! representation instead of the transport's types.

use crate::encoding::ContentEncoder;
use std::collections::HashMap;
use std::net::SocketAddr;

/// An inbound request, fully buffered.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: String,
    /// Path without the query component.
    pub path: String,
    /// Raw query string, when present.
    pub query: Option<String>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub client_addr: Option<SocketAddr>,
}

impl ProxyRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Path plus query, as sent on the request line.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// The request body with any `Content-Encoding` undone, for inspection.
    ///
    /// A body that fails to decode is returned as-is; the rule engine will
    /// classify it as binary.
    pub fn decoded_body(&self) -> Vec<u8> {
        match self.header("content-encoding") {
            Some(method) => ContentEncoder::new(method)
                .decode(Some(&self.body))
                .ok()
                .flatten()
                .unwrap_or_else(|| self.body.clone()),
            None => self.body.clone(),
        }
    }

    /// Whether the client advertises support for `method` in
    /// `Accept-Encoding`.
    pub fn accepts_encoding(&self, method: &str) -> bool {
        self.header("accept-encoding")
            .map(|accept| {
                accept
                    .split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case(method))
            })
            .unwrap_or(false)
    }
}

/// The response a handler produced for the client.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    pub status: u16,
    /// Informational only; the wire carries the canonical reason phrase.
    pub status_description: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Close the connection without writing any response bytes.
    pub drop_connection: bool,
}

impl Default for ProxyResponse {
    fn default() -> Self {
        Self {
            status: 200,
            status_description: String::new(),
            headers: HashMap::new(),
            body: Vec::new(),
            drop_connection: false,
        }
    }
}

impl ProxyResponse {
    /// Generic server-error response. Detail stays server-side.
    pub fn server_error() -> Self {
        Self {
            status: 500,
            status_description: "Internal Server Error".to_string(),
            body: b"An error occurred while processing the request.".to_vec(),
            ..Self::default()
        }
    }

    /// Service-unavailable response used when the origin cannot be reached.
    pub fn service_unavailable() -> Self {
        Self {
            status: 503,
            status_description: "Service Unavailable".to_string(),
            body: b"The remote origin could not be reached.".to_vec(),
            ..Self::default()
        }
    }

    /// Case-insensitive header removal; returns the removed value.
    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        let key = self
            .headers
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()?;
        self.headers.remove(&key)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// One request/response exchange moving through the pipeline.
#[derive(Debug)]
pub struct ProxyContext {
    pub request: ProxyRequest,
    /// Filled in by whichever handler terminates the pipeline.
    pub response: Option<ProxyResponse>,
}

impl ProxyContext {
    pub fn new(request: ProxyRequest) -> Self {
        Self {
            request,
            response: None,
        }
    }
}
