//! Non-blocking message endpoints.
//!
//! An [`Endpoint`] is one message connection: an outbound queue of messages
//! and a single inbound partially-assembled message, multiplexed over one
//! non-blocking socket. No operation performs I/O except [`Endpoint::wait`]
//! (and [`PollGroup::wait`](crate::PollGroup::wait)), which sleep in
//! `poll(2)` and then advance both directions by however many bytes the
//! socket delivers.
//!
//! Lifecycle: a listener stays `Listening` and hands out `Ready` children;
//! a client starts `Connecting` and becomes `Ready` once the socket-level
//! pending error resolves to zero. Any transport or protocol failure moves
//! the endpoint to `Errored`, after which it performs no further I/O and
//! the captured code is available via [`Endpoint::geterror`].
//!
//! Ownership is single-threaded: handles are cheap `Rc` clones and the type
//! is deliberately `!Send`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::error::{is_temporary, MsglinkError, Result};
use crate::poll_group::GroupCore;
use crate::protocol::{Message, RecvFrame, SendFrame};
use crate::transport::{poll, Link};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Listening,
    Connecting,
    Ready,
    Errored,
}

/// A non-blocking message connection.
///
/// Cheaply cloneable handle; all clones refer to the same connection.
#[derive(Clone)]
pub struct Endpoint {
    pub(crate) inner: Rc<RefCell<EndpointInner>>,
}

pub(crate) struct EndpointInner {
    pub(crate) id: u64,
    pub(crate) link: Option<Link>,
    pub(crate) state: State,
    pub(crate) err: i32,
    pub(crate) send_queue: VecDeque<Message>,
    pub(crate) send_inflight: Option<SendFrame>,
    pub(crate) recv_inflight: Option<RecvFrame>,
    pub(crate) recv_ready: Option<Message>,
    pub(crate) accept_slot: Option<Endpoint>,
    pub(crate) group: Option<Weak<RefCell<GroupCore>>>,
}

impl Endpoint {
    /// Bind and listen on `addr`; the endpoint starts out `Listening`.
    ///
    /// Pass port 0 for an ephemeral port and read it back with
    /// [`Endpoint::local_addr`].
    pub fn serve(addr: impl ToSocketAddrs) -> Result<Endpoint> {
        let link = Link::serve(addr)?;
        tracing::debug!(addr = ?link.local_addr().ok(), "listening");
        Ok(Endpoint::from_link(link, State::Listening))
    }

    /// Start a non-blocking connect to `addr`; the endpoint starts out
    /// `Connecting` and completes (or fails) inside a later wait call.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Endpoint> {
        let link = Link::connect(addr)?;
        Ok(Endpoint::from_link(link, State::Connecting))
    }

    pub(crate) fn from_link(link: Link, state: State) -> Endpoint {
        Endpoint {
            inner: Rc::new(RefCell::new(EndpointInner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                link: Some(link),
                state,
                err: 0,
                send_queue: VecDeque::new(),
                send_inflight: None,
                recv_inflight: None,
                recv_ready: None,
                accept_slot: None,
                group: None,
            })),
        }
    }

    /// Stable identity of this connection (shared by all handle clones).
    pub fn id(&self) -> u64 {
        self.inner.borrow().id
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let inner = self.inner.borrow();
        match inner.link.as_ref() {
            Some(link) => Ok(link.local_addr()?),
            None => Err(io::Error::from(ErrorKind::NotConnected).into()),
        }
    }

    /// Queue a message for sending. No I/O happens here; bytes move inside
    /// the next wait call. Ownership of the message transfers to the
    /// endpoint. An `Errored` endpoint discards the message silently.
    pub fn send(&self, msg: Message) {
        let mut inner = self.inner.borrow_mut();
        if inner.state == State::Errored {
            return;
        }
        inner.send_queue.push_back(msg);
    }

    /// Take the completed inbound message, if one is waiting.
    pub fn recv(&self) -> Option<Message> {
        let mut inner = self.inner.borrow_mut();
        let msg = inner.recv_ready.take();
        if let Some(core) = inner.group.as_ref().and_then(Weak::upgrade) {
            core.borrow_mut().readable.remove(&inner.id);
        }
        msg
    }

    /// Take the newly accepted connection, if one is waiting. Only
    /// listening endpoints ever produce one.
    pub fn accept(&self) -> Option<Endpoint> {
        let mut inner = self.inner.borrow_mut();
        let child = inner.accept_slot.take();
        if let Some(core) = inner.group.as_ref().and_then(Weak::upgrade) {
            core.borrow_mut().acceptable.remove(&inner.id);
        }
        child
    }

    /// The captured error code: 0 unless the endpoint is `Errored`.
    pub fn geterror(&self) -> i32 {
        let inner = self.inner.borrow();
        if inner.state == State::Errored {
            inner.err
        } else {
            0
        }
    }

    /// Drive this endpoint until something is consumable or the deadline
    /// passes.
    ///
    /// Returns `Ok(true)` once a received message or an accepted connection
    /// is waiting, `Ok(false)` on deadline expiry or signal interruption,
    /// and `Err` if the endpoint (or the poll itself) failed. A fatal
    /// failure also leaves the endpoint `Errored` with the code readable
    /// via [`Endpoint::geterror`].
    ///
    /// Revents are dispatched at the top of each iteration, before
    /// sleeping, so progress buffered by the previous sleep is drained
    /// first; an already-populated slot returns without blocking.
    pub fn wait(&self, deadline: Instant) -> Result<bool> {
        let mut revents: libc::c_short = 0;
        loop {
            let (fd, events) = {
                let mut inner = self.inner.borrow_mut();
                let events = poll_events(&inner);
                // NB: dispatching the revents of the *previous* iteration.
                handle_revents(&mut inner, revents)?;
                if inner.recv_ready.is_some() || inner.accept_slot.is_some() {
                    return Ok(true);
                }
                (inner.link.as_ref().map_or(-1, Link::fd), events)
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            match poll::wait_single(fd, events, deadline - now) {
                Ok(Some(r)) => revents = r,
                Ok(None) => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Shut the endpoint down: clears every queue and slot, deregisters
    /// from its poll group, and releases the socket. Safe to call more
    /// than once.
    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        die(&mut inner, 0);
        if let Some(weak) = inner.group.take() {
            if let Some(core) = weak.upgrade() {
                core.borrow_mut().members.remove(&inner.id);
            }
        }
        inner.link = None;
    }

    /// Raw descriptor for the group wait loop; -1 once closed (which
    /// `poll(2)` ignores).
    pub(crate) fn fd(&self) -> RawFd {
        self.inner.borrow().link.as_ref().map_or(-1, Link::fd)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Endpoint")
            .field("id", &inner.id)
            .field("state", &inner.state)
            .finish_non_exhaustive()
    }
}

/// The poll events this endpoint currently wants. Pure state inspection;
/// no I/O.
pub(crate) fn poll_events(inner: &EndpointInner) -> libc::c_short {
    match inner.state {
        State::Listening => {
            if inner.accept_slot.is_none() {
                libc::POLLIN
            } else {
                0
            }
        }
        State::Connecting => libc::POLLOUT,
        State::Ready => {
            let mut events = 0;
            if inner.send_inflight.is_some() || !inner.send_queue.is_empty() {
                events |= libc::POLLOUT;
            }
            if inner.recv_ready.is_none() {
                events |= libc::POLLIN;
            }
            events
        }
        State::Errored => 0,
    }
}

/// Dispatch one poll result to the state machine, then refresh the owning
/// group's readiness sets.
pub(crate) fn handle_revents(inner: &mut EndpointInner, revents: libc::c_short) -> Result<()> {
    let result = dispatch(inner, revents);
    update_poll_group(inner);
    result
}

fn dispatch(inner: &mut EndpointInner, revents: libc::c_short) -> Result<()> {
    match inner.state {
        State::Errored => Ok(()),
        State::Connecting => {
            if revents & libc::POLLOUT != 0 {
                match inner.link.as_ref().map(Link::pending_error) {
                    Some(Ok(None)) => {
                        inner.state = State::Ready;
                        tracing::debug!(id = inner.id, "connection established");
                    }
                    // An async connect failure surfaces through geterror
                    // and the errored set, not as a wait error.
                    Some(Ok(Some(err))) => die(inner, err.raw_os_error().unwrap_or(libc::EIO)),
                    Some(Err(err)) => die(inner, err.raw_os_error().unwrap_or(libc::EIO)),
                    None => {}
                }
            }
            Ok(())
        }
        State::Ready => {
            if revents & libc::POLLOUT != 0 {
                if let Err(e) = flush_send(inner) {
                    let errno = e.errno();
                    die(inner, errno);
                    return Err(e);
                }
            }
            if revents & libc::POLLIN != 0 {
                if let Err(e) = flush_recv(inner) {
                    let errno = e.errno();
                    die(inner, errno);
                    return Err(e);
                }
            }
            Ok(())
        }
        State::Listening => {
            if revents & libc::POLLIN != 0 {
                // Event computation only asks for readability while the
                // accept slot is free.
                debug_assert!(inner.accept_slot.is_none());
                let accepted = match inner.link.as_ref() {
                    Some(link) => link.accept_nowait(),
                    None => Ok(None),
                };
                match accepted {
                    Ok(Some(link)) => {
                        let child = Endpoint::from_link(link, State::Ready);
                        tracing::debug!(id = inner.id, child = child.id(), "accepted connection");
                        inner.accept_slot = Some(child);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        die(inner, e.raw_os_error().unwrap_or(libc::EIO));
                        return Err(e.into());
                    }
                }
            }
            Ok(())
        }
    }
}

/// Write queued messages until the socket stops taking bytes.
///
/// Temporary errno values mean "try again after the next poll" and are not
/// failures; a zero-byte write or any other error is fatal.
fn flush_send(inner: &mut EndpointInner) -> Result<()> {
    let Some(link) = inner.link.as_ref() else {
        return Ok(());
    };
    let Some(stream) = link.stream() else {
        return Ok(());
    };
    let mut stream = stream;

    loop {
        if inner.send_inflight.is_none() {
            match inner.send_queue.pop_front() {
                // Header bytes are materialised here, once per message.
                Some(msg) => inner.send_inflight = Some(SendFrame::new(msg)),
                None => return Ok(()),
            }
        }
        let Some(frame) = inner.send_inflight.as_mut() else {
            return Ok(());
        };
        if frame.is_complete() {
            inner.send_inflight = None;
            continue;
        }
        match stream.write(frame.remaining()) {
            Ok(0) => return Err(MsglinkError::ConnectionClosed),
            Ok(n) => frame.advance(n),
            Err(e) if is_temporary(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

/// Read inbound bytes until a full message is assembled or the socket runs
/// dry. A completed message parks in `recv_ready` and blocks further
/// receiving until the caller takes it.
fn flush_recv(inner: &mut EndpointInner) -> Result<()> {
    let Some(link) = inner.link.as_ref() else {
        return Ok(());
    };
    let Some(stream) = link.stream() else {
        return Ok(());
    };
    let mut stream = stream;

    while inner.recv_ready.is_none() {
        let frame = inner.recv_inflight.get_or_insert_with(RecvFrame::new);
        match stream.read(frame.window_mut()) {
            // Peer closed mid-message.
            Ok(0) => return Err(MsglinkError::ConnectionClosed),
            Ok(n) => {
                if let Some(msg) = frame.advance(n)? {
                    inner.recv_ready = Some(msg);
                    inner.recv_inflight = None;
                }
            }
            Err(e) if is_temporary(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Mark the endpoint dead with `err` (0 for a clean close), clearing every
/// queue and slot and updating the owning group's readiness sets.
pub(crate) fn die(inner: &mut EndpointInner, err: i32) {
    inner.state = State::Errored;
    inner.err = err;
    if err != 0 {
        tracing::debug!(id = inner.id, errno = err, "endpoint died");
    }

    if let Some(child) = inner.accept_slot.take() {
        child.close();
    }
    inner.send_inflight = None;
    inner.recv_inflight = None;
    inner.recv_ready = None;
    inner.send_queue.clear();

    if let Some(core) = inner.group.as_ref().and_then(Weak::upgrade) {
        let mut core = core.borrow_mut();
        core.acceptable.remove(&inner.id);
        core.readable.remove(&inner.id);
        if err == 0 {
            core.errored.remove(&inner.id);
        } else {
            core.errored.insert(inner.id);
        }
    }
}

fn update_poll_group(inner: &EndpointInner) {
    let Some(core) = inner.group.as_ref().and_then(Weak::upgrade) else {
        return;
    };
    let mut core = core.borrow_mut();
    if inner.state == State::Errored {
        core.errored.insert(inner.id);
    }
    if inner.recv_ready.is_some() {
        core.readable.insert(inner.id);
    }
    if inner.accept_slot.is_some() {
        core.acceptable.insert(inner.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn soon() -> Instant {
        Instant::now() + Duration::from_millis(200)
    }

    #[test]
    fn test_listener_wants_read_until_slot_full() {
        let server = Endpoint::serve("127.0.0.1:0").unwrap();
        assert_eq!(poll_events(&server.inner.borrow()), libc::POLLIN);
    }

    #[test]
    fn test_connecting_wants_write() {
        let server = Endpoint::serve("127.0.0.1:0").unwrap();
        let client = Endpoint::connect(server.local_addr().unwrap()).unwrap();
        assert_eq!(poll_events(&client.inner.borrow()), libc::POLLOUT);
    }

    #[test]
    fn test_connect_completes_inside_wait() {
        let server = Endpoint::serve("127.0.0.1:0").unwrap();
        let client = Endpoint::connect(server.local_addr().unwrap()).unwrap();

        // The TCP handshake finishes against the listen backlog even though
        // nothing accepts; the wait itself reports timeout.
        assert!(!client.wait(soon()).unwrap());
        assert_eq!(client.inner.borrow().state, State::Ready);
        assert_eq!(client.geterror(), 0);
    }

    #[test]
    fn test_ready_events_follow_queues() {
        let server = Endpoint::serve("127.0.0.1:0").unwrap();
        let client = Endpoint::connect(server.local_addr().unwrap()).unwrap();
        client.wait(soon()).unwrap();

        // Nothing queued: read interest only.
        assert_eq!(poll_events(&client.inner.borrow()), libc::POLLIN);

        // Queued message adds write interest.
        client.send(Message::from_buffer(&b"x"[..]));
        assert_eq!(
            poll_events(&client.inner.borrow()),
            libc::POLLIN | libc::POLLOUT
        );
    }

    #[test]
    fn test_wait_with_expired_deadline_returns_timeout() {
        let server = Endpoint::serve("127.0.0.1:0").unwrap();
        assert!(!server.wait(Instant::now()).unwrap());
    }

    #[test]
    fn test_connect_refused_captures_error() {
        // Grab a port with no listener behind it.
        let probe = Endpoint::serve("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap();
        probe.close();

        let client = Endpoint::connect(addr).unwrap();
        // The failed connect is not a wait error; it resolves to Errored.
        assert!(!client.wait(soon()).unwrap());
        assert_ne!(client.geterror(), 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let server = Endpoint::serve("127.0.0.1:0").unwrap();
        server.close();
        server.close();
        assert_eq!(server.geterror(), 0);
        assert!(server.recv().is_none());
        assert!(server.accept().is_none());

        // A closed endpoint makes no progress and reports timeout.
        assert!(!server.wait(Instant::now()).unwrap());
    }

    #[test]
    fn test_send_after_close_discards() {
        let server = Endpoint::serve("127.0.0.1:0").unwrap();
        let client = Endpoint::connect(server.local_addr().unwrap()).unwrap();
        client.close();
        client.send(Message::from_buffer(&b"dropped"[..]));
        assert!(client.inner.borrow().send_queue.is_empty());
    }

    #[test]
    fn test_die_clears_everything() {
        let server = Endpoint::serve("127.0.0.1:0").unwrap();
        let client = Endpoint::connect(server.local_addr().unwrap()).unwrap();
        client.wait(soon()).unwrap();
        client.send(Message::from_buffer(&b"queued"[..]));

        {
            let mut inner = client.inner.borrow_mut();
            die(&mut inner, libc::EPIPE);
            assert!(inner.send_queue.is_empty());
            assert!(inner.send_inflight.is_none());
            assert!(inner.recv_inflight.is_none());
            assert!(inner.recv_ready.is_none());
            assert!(inner.accept_slot.is_none());
        }
        assert_eq!(client.geterror(), libc::EPIPE);
    }
}
