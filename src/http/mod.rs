//! HTTP building blocks shared by the HTTP/2 server
//!
//! This module holds the protocol-neutral pieces: header collections,
//! request/response messages and the session operations abstraction used
//! to drive sockets. The HTTP/2 machinery lives in [`h2`].
//!
//! # Architecture
//!
//! - `SessionOps` trait defines socket operations (poll, read, write, close, abort)
//! - `FdSessionOps` implements it for plain TCP
//! - `HttpRequest` / `HttpResponse` are what request handlers see and return
//!
//! # Examples
//!
//! ```no_run
//! use h2channel::http::{HttpRequest, HttpResponse, Status};
//! use h2channel::http::h2::{ConnectionConfig, H2Server};
//!
//! let server = H2Server::bind("127.0.0.1:8080", ConnectionConfig::default()).unwrap();
//! server
//!     .serve(|request: &HttpRequest| {
//!         HttpResponse::builder()
//!             .status(Status::OK)
//!             .header("content-type", "text/plain")
//!             .body(format!("you asked for {}", request.path()).into_bytes())
//!             .build()
//!     })
//!     .unwrap();
//! ```

pub mod h2;
pub mod headers;
pub mod message;
pub mod session;

pub use headers::Headers;
pub use message::{HttpRequest, HttpResponse, HttpResponseBuilder, Method, Status, HTTP2_VERSION};
pub use session::{FdSessionOps, PollEvents, SessionOps};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

/// Maximum number of header fields kept per message
pub const MAX_HEADERS: usize = 128;
