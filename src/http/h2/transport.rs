//! Byte transport under an HTTP/2 connection

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;

/// Duplex byte transport the connection writes to
///
/// Inbound bytes are pushed into the connection by whoever drives it, so
/// the trait only covers the outbound half and connection teardown.
pub trait Transport {
    /// Queue bytes for the peer
    fn write(&mut self, data: &[u8]);

    /// Close after pending output is flushed
    fn lose_connection(&mut self);

    /// Close immediately, discarding pending output
    fn abort_connection(&mut self);

    /// Remote address
    fn peer(&self) -> Option<SocketAddr>;

    /// Local address
    fn host(&self) -> Option<SocketAddr>;

    /// Whether the transport is encrypted
    fn is_secure(&self) -> bool {
        false
    }
}

/// In-memory transport that records everything written to it
#[derive(Debug, Default)]
pub struct BufferedTransport {
    written: BytesMut,
    lose_calls: usize,
    abort_calls: usize,
    peer: Option<SocketAddr>,
    host: Option<SocketAddr>,
    secure: bool,
}

impl BufferedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the addresses reported by [`Transport::peer`] and [`Transport::host`]
    pub fn with_addrs(mut self, peer: Option<SocketAddr>, host: Option<SocketAddr>) -> Self {
        self.peer = peer;
        self.host = host;
        self
    }

    /// Report the transport as secure
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Take everything written so far
    pub fn take_written(&mut self) -> Bytes {
        self.written.split().freeze()
    }

    /// Bytes written and not yet taken
    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Times `lose_connection` was called
    pub fn lose_calls(&self) -> usize {
        self.lose_calls
    }

    /// Times `abort_connection` was called
    pub fn abort_calls(&self) -> usize {
        self.abort_calls
    }

    pub fn is_closing(&self) -> bool {
        self.lose_calls > 0
    }

    pub fn is_aborted(&self) -> bool {
        self.abort_calls > 0
    }
}

impl Transport for BufferedTransport {
    fn write(&mut self, data: &[u8]) {
        if !self.is_aborted() {
            self.written.extend_from_slice(data);
        }
    }

    fn lose_connection(&mut self) {
        self.lose_calls += 1;
    }

    fn abort_connection(&mut self) {
        self.abort_calls += 1;
        self.written.clear();
    }

    fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn host(&self) -> Option<SocketAddr> {
        self.host
    }

    fn is_secure(&self) -> bool {
        self.secure
    }
}
