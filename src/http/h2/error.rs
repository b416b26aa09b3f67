//! Errors and wire error codes
//!
//! Every [`Error`] knows the [`ErrorCode`] to send when it ends a stream
//! or the whole connection.

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] crate::http::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Flow control error: {0}")]
    FlowControl(String),

    /// Frame or send on a stream that is already closed
    #[error("Stream closed: {0}")]
    StreamClosed(u32),

    #[error("Frame size error: {0}")]
    FrameSize(String),

    /// HPACK state is unusable; always fatal to the connection
    #[error("Compression error: {0}")]
    Compression(String),

    /// Stream identifier not valid where it appeared
    #[error("Invalid stream ID: {0}")]
    InvalidStreamId(u32),

    /// No live stream with this identifier
    #[error("Stream not found: {0}")]
    StreamNotFound(u32),

    /// The peer opened more streams than we advertised
    #[error("Too many concurrent streams")]
    TooManyStreams,

    #[error("Invalid settings value: {0}")]
    InvalidSettings(String),

    /// Missing or malformed client connection preface
    #[error("Missing connection preface")]
    MissingPreface,

    /// Malformed request header block; fatal to the stream only
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// The engine has already failed or sent GOAWAY
    #[error("Connection closed")]
    ConnectionClosed,

    /// Peer stopped reading while we kept producing control frames
    #[error("Excessive buffering: {buffered} control frame bytes buffered (limit {limit})")]
    ExcessiveBuffering { buffered: usize, limit: usize },

    /// The transport or the peer went away
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A single stream was reset
    #[error("Stream reset with code {0}")]
    StreamReset(ErrorCode),

    /// A second outbound producer was registered on a stream
    #[error("Stream {0} already has a registered producer")]
    ProducerAlreadyRegistered(u32),
}

impl Error {
    /// The error code to put on the wire when this error ends a stream or connection
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Protocol(_)
            | Error::MissingPreface
            | Error::InvalidStreamId(_)
            | Error::InvalidHeader(_)
            | Error::InvalidSettings(_) => ErrorCode::ProtocolError,
            Error::FlowControl(_) => ErrorCode::FlowControlError,
            Error::StreamClosed(_) => ErrorCode::StreamClosed,
            Error::FrameSize(_) => ErrorCode::FrameSizeError,
            Error::Compression(_) => ErrorCode::CompressionError,
            Error::TooManyStreams => ErrorCode::RefusedStream,
            Error::ExcessiveBuffering { .. } => ErrorCode::EnhanceYourCalm,
            Error::StreamReset(code) => *code,
            _ => ErrorCode::InternalError,
        }
    }
}

/// Error codes carried by RST_STREAM and GOAWAY (RFC 7540 Section 7)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

const ERROR_CODES: [(ErrorCode, &str); 14] = [
    (ErrorCode::NoError, "NO_ERROR"),
    (ErrorCode::ProtocolError, "PROTOCOL_ERROR"),
    (ErrorCode::InternalError, "INTERNAL_ERROR"),
    (ErrorCode::FlowControlError, "FLOW_CONTROL_ERROR"),
    (ErrorCode::SettingsTimeout, "SETTINGS_TIMEOUT"),
    (ErrorCode::StreamClosed, "STREAM_CLOSED"),
    (ErrorCode::FrameSizeError, "FRAME_SIZE_ERROR"),
    (ErrorCode::RefusedStream, "REFUSED_STREAM"),
    (ErrorCode::Cancel, "CANCEL"),
    (ErrorCode::CompressionError, "COMPRESSION_ERROR"),
    (ErrorCode::ConnectError, "CONNECT_ERROR"),
    (ErrorCode::EnhanceYourCalm, "ENHANCE_YOUR_CALM"),
    (ErrorCode::InadequateSecurity, "INADEQUATE_SECURITY"),
    (ErrorCode::Http11Required, "HTTP_1_1_REQUIRED"),
];

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(code: u32) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|index| ERROR_CODES.get(index))
            .map(|(code, _)| *code)
    }

    /// Decode a code received from the peer
    ///
    /// Unknown codes must not trigger special behavior (RFC 7540 Section 7),
    /// so they are all reported as INTERNAL_ERROR.
    pub fn from_wire(code: u32) -> Self {
        Self::from_u32(code).unwrap_or(ErrorCode::InternalError)
    }

    pub fn name(&self) -> &'static str {
        ERROR_CODES[*self as usize].1
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u32())
    }
}

/// Result type for HTTP/2 operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_conversion() {
        assert_eq!(ErrorCode::NoError.as_u32(), 0x0);
        assert_eq!(ErrorCode::Http11Required.as_u32(), 0xd);

        assert_eq!(ErrorCode::from_u32(0x1), Some(ErrorCode::ProtocolError));
        assert_eq!(ErrorCode::from_u32(0xff), None);
    }

    #[test]
    fn test_unknown_wire_code_is_internal_error() {
        assert_eq!(ErrorCode::from_wire(0x8), ErrorCode::Cancel);
        assert_eq!(ErrorCode::from_wire(0x1234), ErrorCode::InternalError);
    }

    #[test]
    fn test_error_to_code() {
        assert_eq!(Error::MissingPreface.code(), ErrorCode::ProtocolError);
        assert_eq!(Error::FlowControl("x".into()).code(), ErrorCode::FlowControlError);
        assert_eq!(Error::FrameSize("x".into()).code(), ErrorCode::FrameSizeError);
        assert_eq!(Error::Compression("x".into()).code(), ErrorCode::CompressionError);
        assert_eq!(Error::StreamReset(ErrorCode::Cancel).code(), ErrorCode::Cancel);
        assert_eq!(Error::ConnectionClosed.code(), ErrorCode::InternalError);
    }

    #[test]
    fn test_error_display() {
        let err = Error::StreamReset(ErrorCode::Cancel);
        assert_eq!(err.to_string(), "Stream reset with code CANCEL (0x8)");

        let err = Error::ExcessiveBuffering { buffered: 17408, limit: 17408 };
        assert_eq!(
            err.to_string(),
            "Excessive buffering: 17408 control frame bytes buffered (limit 17408)"
        );
    }
}
