//! Request and response messages
//!
//! What a [`Handler`](super::h2::Handler) sees once a stream's request is
//! complete, and what it hands back. The HTTP/2 layer turns responses into
//! HEADERS and DATA frames.

use super::{Error, Headers, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

const METHODS: [(Method, &str); 9] = [
    (Method::Get, "GET"),
    (Method::Head, "HEAD"),
    (Method::Post, "POST"),
    (Method::Put, "PUT"),
    (Method::Delete, "DELETE"),
    (Method::Connect, "CONNECT"),
    (Method::Options, "OPTIONS"),
    (Method::Trace, "TRACE"),
    (Method::Patch, "PATCH"),
];

impl Method {
    /// Parse a `:method` token; tokens are case-sensitive
    pub fn from_str(s: &str) -> Result<Self> {
        METHODS
            .iter()
            .find(|(_, token)| *token == s)
            .map(|(method, _)| *method)
            .ok_or_else(|| Error::InvalidMethod(s.to_string()))
    }

    pub fn as_str(&self) -> &'static str {
        METHODS[*self as usize].1
    }

    /// Responses to this method never carry a body
    pub fn is_bodiless(&self) -> bool {
        matches!(self, Method::Head)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The protocol version reported to request consumers
pub const HTTP2_VERSION: &str = "HTTP/2";

/// Response status code, 100-599
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(u16);

impl Status {
    pub const CONTINUE: Status = Status(100);
    pub const OK: Status = Status(200);
    pub const NO_CONTENT: Status = Status(204);
    pub const BAD_REQUEST: Status = Status(400);
    pub const NOT_FOUND: Status = Status(404);
    pub const INTERNAL_SERVER_ERROR: Status = Status(500);
    pub const NOT_IMPLEMENTED: Status = Status(501);

    pub fn new(code: u16) -> Result<Self> {
        if (100..600).contains(&code) {
            Ok(Status(code))
        } else {
            Err(Error::InvalidStatus(code.to_string()))
        }
    }

    pub fn code(&self) -> u16 {
        self.0
    }

    pub fn is_informational(&self) -> bool {
        self.0 < 200
    }

    /// Status codes whose responses have no body (1xx, 204, 304)
    pub fn forbids_body(&self) -> bool {
        self.is_informational() || self.0 == 204 || self.0 == 304
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fully received request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    method: Method,
    path: String,
    headers: Headers,
    body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        HttpRequest {
            method,
            path: path.into(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// The `:path` pseudo-header
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// First value of a regular header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_string(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }
}

/// A response produced by a request handler
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: Status,
    headers: Headers,
    body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: Status) -> Self {
        HttpResponse {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn builder() -> HttpResponseBuilder {
        HttpResponseBuilder(HttpResponse::new(Status::OK))
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: Vec<u8>) {
        self.body = body;
    }

    /// Split into status, header fields and body
    pub fn into_parts(self) -> (Status, Headers, Vec<u8>) {
        (self.status, self.headers, self.body)
    }
}

/// Builder for [`HttpResponse`]; status defaults to 200
#[derive(Debug)]
pub struct HttpResponseBuilder(HttpResponse);

impl HttpResponseBuilder {
    pub fn status(mut self, status: Status) -> Self {
        self.0.status = status;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.0.body = body;
        self
    }

    pub fn build(self) -> HttpResponse {
        self.0
    }
}
