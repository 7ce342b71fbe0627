//! Non-blocking stream-socket facade.
//!
//! A [`Link`] is either a listening socket or a (possibly still connecting)
//! stream, always in non-blocking mode. The endpoint layer only needs a
//! handful of capabilities from it: serve, connect without waiting, accept
//! without waiting, raw-fd extraction for `poll(2)`, and the socket-level
//! pending error that resolves an in-progress connect.

use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::unix::io::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};

/// One stream connection or listener, non-blocking.
#[derive(Debug)]
pub enum Link {
    Listener(TcpListener),
    Stream(TcpStream),
}

impl Link {
    /// Bind and listen on `addr`, non-blocking.
    ///
    /// Port 0 requests an ephemeral port; see [`Link::local_addr`].
    pub fn serve(addr: impl ToSocketAddrs) -> io::Result<Link> {
        let addr = resolve(addr)?;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(128)?;
        socket.set_nonblocking(true)?;
        Ok(Link::Listener(socket.into()))
    }

    /// Start a non-blocking connect to `addr`.
    ///
    /// Returns as soon as the connect is initiated; `EINPROGRESS` is the
    /// normal outcome. Completion is observed by polling for writability
    /// and querying [`Link::pending_error`].
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<Link> {
        let addr = resolve(addr)?;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_nonblocking(true)?;
        match socket.connect(&addr.into()) {
            Ok(()) => {}
            Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
            Err(e) => return Err(e),
        }
        Ok(Link::Stream(socket.into()))
    }

    /// Accept one pending connection without waiting.
    ///
    /// Returns `Ok(None)` when nothing is queued (a spurious wakeup).
    pub fn accept_nowait(&self) -> io::Result<Option<Link>> {
        match self {
            Link::Listener(listener) => match listener.accept() {
                Ok((stream, _peer)) => {
                    stream.set_nonblocking(true)?;
                    Ok(Some(Link::Stream(stream)))
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(e),
            },
            Link::Stream(_) => Err(io::Error::new(
                ErrorKind::InvalidInput,
                "accept on a non-listening link",
            )),
        }
    }

    /// Raw descriptor for the multiplex call.
    pub fn fd(&self) -> RawFd {
        match self {
            Link::Listener(l) => l.as_raw_fd(),
            Link::Stream(s) => s.as_raw_fd(),
        }
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Link::Listener(l) => l.local_addr(),
            Link::Stream(s) => s.local_addr(),
        }
    }

    /// Take the socket-level pending error (`SO_ERROR`).
    ///
    /// `Ok(None)` means an in-progress connect completed successfully.
    pub fn pending_error(&self) -> io::Result<Option<io::Error>> {
        match self {
            Link::Listener(l) => l.take_error(),
            Link::Stream(s) => s.take_error(),
        }
    }

    /// The connected stream, if this link is one.
    pub fn stream(&self) -> Option<&TcpStream> {
        match self {
            Link::Stream(s) => Some(s),
            Link::Listener(_) => None,
        }
    }
}

fn resolve(addr: impl ToSocketAddrs) -> io::Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(ErrorKind::AddrNotAvailable, "address resolved to nothing")
    })
}
