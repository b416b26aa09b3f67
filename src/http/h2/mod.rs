//! HTTP/2 server connections
//!
//! The pieces, bottom up:
//!
//! - [`frames`] / [`codec`]: frame types and their wire encoding
//! - [`engine`]: a sans-IO protocol state machine turning bytes into
//!   [`Event`]s and queuing outbound frames
//! - [`priority`]: the RFC 7540 dependency tree deciding which stream sends next
//! - [`connection`]: [`H2Connection`], multiplexing request streams over one
//!   [`Transport`] with flow control, backpressure and timeouts
//! - [`stream`]: [`H2Stream`] and the [`StreamIo`] handle given to request
//!   consumers and response producers
//! - [`server`]: a thread-per-connection TCP driver
//!
//! # Architecture
//!
//! The connection never does I/O itself. Bytes read from the socket are fed
//! to [`H2Connection::data_received`]; everything the connection writes goes
//! to its [`Transport`]. Timers (sender loop, idle timeout, forced abort, pull
//! producers) run on a virtual clock advanced by the driver, which makes the
//! whole connection deterministic under test.
//!
//! # Examples
//!
//! ```no_run
//! use h2channel::http::h2::{handler_factory, BufferedTransport, ConnectionConfig, H2Connection};
//! use h2channel::http::{HttpRequest, HttpResponse, Status};
//! use std::sync::Arc;
//!
//! let handler = Arc::new(|request: &HttpRequest| {
//!     HttpResponse::builder()
//!         .status(Status::OK)
//!         .body(request.path().as_bytes().to_vec())
//!         .build()
//! });
//!
//! let mut connection = H2Connection::new(
//!     BufferedTransport::new(),
//!     handler_factory(handler),
//!     ConnectionConfig::default(),
//! );
//! connection.connection_made();
//!
//! # let bytes_from_peer: &[u8] = &[];
//! connection.data_received(bytes_from_peer);
//! connection.run_pending();
//! let to_peer = connection.transport_mut().take_written();
//! # drop(to_peer);
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod flow_control;
pub mod frames;
pub mod priority;
pub mod producer;
pub mod reactor;
pub mod request;
pub mod server;
pub mod settings;
pub mod state;
pub mod stream;
pub mod transport;

pub use config::{ConnectionConfig, ConnectionConfigBuilder};
pub use connection::{H2Connection, TransportState};
pub use engine::{Event, ProtocolEngine};
pub use error::{Error, ErrorCode, Result};
pub use frames::{DataFrame, Frame, FrameFlags, FrameType, HeadersFrame, SettingsFrame};
pub use priority::{PriorityError, PriorityTree};
pub use producer::{Producer, PullProducer, PullToPush, PushProducer};
pub use request::{handler_factory, BufferedRequest, Handler, RequestConsumer, RequestFactory};
pub use server::{serve_session, H2Server, H2ServerBuilder};
pub use settings::{Settings, SettingsBuilder};
pub use state::StreamState;
pub use stream::{H2Stream, StreamIo};
pub use transport::{BufferedTransport, Transport};

/// HTTP/2 stream identifier
pub type StreamId = u32;

/// HTTP/2 connection preface that must be sent by clients
///
/// From RFC 7540 Section 3.5:
/// "PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n"
pub const CONNECTION_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Default initial window size (65535 bytes)
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65535;

/// Default maximum frame size (16384 bytes)
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16384;

/// Default header table size (4096 bytes)
pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4096;

/// Maximum stream ID value (2^31 - 1)
pub const MAX_STREAM_ID: u32 = 0x7FFFFFFF;

/// Stream ID 0 (connection-level)
pub const CONNECTION_STREAM_ID: u32 = 0;
