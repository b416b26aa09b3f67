//! Thread-per-connection TCP front end for [`H2Connection`]
//!
//! Each accepted socket gets its own thread running [`serve_session`]: poll
//! the non-blocking socket with the connection's next timer as the timeout,
//! feed what was read, advance the timers by the wall time that passed, and
//! write out whatever the connection produced. A socket that stops taking
//! output pauses the connection until it drains. Prior knowledge only; there
//! is no TLS or upgrade handling here.

use super::config::ConnectionConfig;
use super::connection::H2Connection;
use super::error::{Error, Result};
use super::request::{handler_factory, Handler, RequestFactory};
use super::transport::BufferedTransport;
use crate::http::{Error as HttpError, FdSessionOps, PollEvents, SessionOps};
use bytes::{Buf, BytesMut};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Bytes read from the socket per poll
pub const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Default listen backlog
pub const DEFAULT_BACKLOG: i32 = 1024;

/// HTTP/2 server listening on a TCP socket
pub struct H2Server {
    listener: TcpListener,
    config: ConnectionConfig,
    nodelay: bool,
}

/// Builder for [`H2Server`]
#[derive(Debug)]
pub struct H2ServerBuilder {
    config: ConnectionConfig,
    backlog: i32,
    nodelay: bool,
}

impl H2ServerBuilder {
    pub fn new() -> Self {
        H2ServerBuilder {
            config: ConnectionConfig::default(),
            backlog: DEFAULT_BACKLOG,
            nodelay: true,
        }
    }

    /// Configuration given to every accepted connection
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Set TCP_NODELAY on accepted sockets
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Bind the listening socket
    pub fn bind(self, addr: impl ToSocketAddrs) -> Result<H2Server> {
        self.config.validate()?;

        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::Io(io::Error::new(io::ErrorKind::InvalidInput, "no address to bind")))?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(self.backlog)?;

        let listener: TcpListener = socket.into();
        info!(addr = ?listener.local_addr().ok(), "HTTP/2 server listening");

        Ok(H2Server {
            listener,
            config: self.config,
            nodelay: self.nodelay,
        })
    }
}

impl Default for H2ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl H2Server {
    /// Bind `addr`, serving every connection with `config`
    pub fn bind(addr: impl ToSocketAddrs, config: ConnectionConfig) -> Result<Self> {
        H2ServerBuilder::new().config(config).bind(addr)
    }

    pub fn builder() -> H2ServerBuilder {
        H2ServerBuilder::new()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Accept one connection and serve it on this thread until it closes
    pub fn serve_connection<H>(&self, handler: Arc<H>) -> Result<()>
    where
        H: Handler + ?Sized + 'static,
    {
        let session = self.accept()?;
        serve_session(session, handler_factory(handler), self.config.clone())
    }

    /// Accept connections forever, one thread each
    pub fn serve<H>(&self, handler: H) -> Result<()>
    where
        H: Handler + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        loop {
            let session = match self.accept() {
                Ok(session) => session,
                Err(err) => {
                    warn!(%err, "accept failed");
                    continue;
                }
            };

            let handler = Arc::clone(&handler);
            let config = self.config.clone();
            thread::spawn(move || {
                let peer = session.peer_addr();
                if let Err(err) = serve_session(session, handler_factory(handler), config) {
                    debug!(?peer, %err, "connection ended with error");
                }
            });
        }
    }

    fn accept(&self) -> Result<FdSessionOps> {
        let (stream, peer) = self.listener.accept()?;
        if self.nodelay {
            stream.set_nodelay(true)?;
        }
        debug!(%peer, "accepted connection");
        Ok(FdSessionOps::new(stream))
    }
}

/// Output the socket has not taken yet
///
/// While bytes are held here the connection is paused as a producer, so it
/// buffers control frames and stops sending DATA until the socket drains.
#[derive(Debug, Default)]
struct Backlog {
    pending: BytesMut,
    paused: bool,
}

impl Backlog {
    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Move the connection's output onto the socket, as much as it takes
    fn flush<S: SessionOps>(&mut self, session: &mut S, connection: &mut H2Connection<BufferedTransport>) -> Result<()> {
        loop {
            self.pending.extend_from_slice(&connection.transport_mut().take_written());

            while !self.pending.is_empty() {
                match session.write(&self.pending) {
                    Ok(0) => return Err(Error::Io(io::ErrorKind::WriteZero.into())),
                    Ok(n) => self.pending.advance(n),
                    Err(HttpError::Io(err)) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(HttpError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => {
                        if !self.paused {
                            trace!(pending = self.pending.len(), "socket full, pausing connection");
                            self.paused = true;
                            connection.pause_producing();
                        }
                        return Ok(());
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            if !self.paused {
                return Ok(());
            }
            // drained: let the connection produce again and send what it makes
            trace!("socket drained, resuming connection");
            self.paused = false;
            connection.resume_producing();
            connection.run_pending();
        }
    }
}

/// Run one HTTP/2 connection over `session` until either side closes it
///
/// The socket is switched to non-blocking mode. Output the peer does not
/// read is held back and pauses the connection, which then enforces its own
/// buffering limit and timers instead of this thread blocking in a write.
pub fn serve_session<S, F>(mut session: S, factory: F, config: ConnectionConfig) -> Result<()>
where
    S: SessionOps,
    F: RequestFactory + 'static,
{
    session.set_nonblocking(true)?;

    let transport = BufferedTransport::new().with_addrs(session.peer_addr(), session.local_addr());
    let mut connection = H2Connection::new(transport, factory, config);
    connection.connection_made();

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut backlog = Backlog::default();
    let mut last = Instant::now();

    loop {
        connection.run_pending();
        if let Err(err) = backlog.flush(&mut session, &mut connection) {
            connection.connection_lost(Error::ConnectionLost(err.to_string()));
            return Err(err);
        }

        if connection.transport().is_aborted() {
            session.abort()?;
            connection.connection_lost(Error::ConnectionLost("Connection aborted".to_string()));
            return Ok(());
        }
        let closing = connection.transport().is_closing();
        if closing && backlog.is_empty() {
            session.close()?;
            connection.connection_lost(Error::ConnectionLost("Connection closed".to_string()));
            return Ok(());
        }

        let events = if closing {
            PollEvents::Write
        } else if backlog.is_empty() {
            PollEvents::Read
        } else {
            PollEvents::Both
        };
        let ready = match session.poll(events, connection.next_timeout()) {
            Ok(ready) => ready,
            Err(err) => {
                connection.connection_lost(Error::ConnectionLost(err.to_string()));
                return Err(err.into());
            }
        };

        let now = Instant::now();
        connection.advance(now - last);
        last = now;

        if !ready || events == PollEvents::Write {
            continue;
        }

        match session.read(&mut buf) {
            Ok(0) => {
                debug!(peer = ?session.peer_addr(), "peer closed connection");
                connection.connection_lost(Error::ConnectionLost("Connection closed by peer".to_string()));
                return Ok(());
            }
            Ok(n) => connection.data_received(&buf[..n]),
            Err(HttpError::Io(err))
                if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {}
            Err(err) => {
                connection.connection_lost(Error::ConnectionLost(err.to_string()));
                return Err(err.into());
            }
        }
    }
}
