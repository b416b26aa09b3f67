//! Session operations abstraction
//!
//! The TCP driver talks to sockets through `SessionOps` so the connection
//! loop never touches a raw stream directly. `FdSessionOps` is the plain
//! TCP implementation: `libc::poll` for readiness and `socket2` for the
//! socket options a hard abort needs.

use super::{Error, Result};
use socket2::SockRef;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::AsRawFd;
use std::time::Duration;

/// Session operations trait
///
/// Operations the connection driver performs on a session.
pub trait SessionOps {
    /// Poll the session for events
    ///
    /// Returns true if the session is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session; `Ok(0)` means the peer closed
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    ///
    /// A non-blocking session reports a full send buffer as an I/O error
    /// of kind `WouldBlock`.
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Switch reads and writes between blocking and non-blocking
    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()>;

    /// Close the session cleanly
    fn close(&mut self) -> Result<()>;

    /// Tear the session down immediately, discarding unsent data
    fn abort(&mut self) -> Result<()>;

    /// Address of the remote end
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Address of the local end
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// Plain file descriptor session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create a new FD session operations from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        use libc::{poll, pollfd, POLLIN, POLLOUT};

        let mut pfd = pollfd {
            fd: self.stream.as_raw_fd(),
            events: match events {
                PollEvents::Read => POLLIN,
                PollEvents::Write => POLLOUT,
                PollEvents::Both => POLLIN | POLLOUT,
            },
            revents: 0,
        };

        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1); // -1 = infinite

        // SAFETY: pfd is a valid pollfd for the duration of the call
        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(Error::Io(err));
        }

        Ok(result > 0)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from)
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()> {
        self.stream.set_nonblocking(nonblocking).map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(Error::from(e)),
            _ => Ok(()),
        }
    }

    fn abort(&mut self) -> Result<()> {
        // Linger of zero turns the close into an RST
        SockRef::from(&self.stream).set_linger(Some(Duration::ZERO))?;
        self.close()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.local_addr().ok()
    }
}
