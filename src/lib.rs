//! # msglink
//!
//! Non-blocking, length-prefixed message transport over TCP.
//!
//! Endpoints exchange discrete, opaque messages without ever blocking the
//! caller; a poll group lets one thread drive many endpoints through a
//! single `poll(2)` call. Every message travels as a fixed 16-byte header
//! (magic tag, payload kind, big-endian length) followed by the payload
//! bytes, head-to-tail on the stream.
//!
//! ## Architecture
//!
//! - **Queue, don't write**: [`Endpoint::send`] only enqueues. All I/O
//!   happens inside [`Endpoint::wait`] or [`PollGroup::wait`], which poll
//!   the sockets and advance each endpoint's in-flight send and receive by
//!   however many bytes the kernel takes or gives.
//! - **Single-threaded by contract**: handles are `Rc`-based and `!Send`;
//!   one thread owns an endpoint and its group.
//! - **Errors stay on the endpoint**: a transport or protocol failure moves
//!   the endpoint to an error state, observable via [`Endpoint::geterror`]
//!   and the group's `errored` set, and never panics or calls back.
//!
//! ## Example
//!
//! ```ignore
//! use std::time::{Duration, Instant};
//! use msglink::{Endpoint, Message};
//!
//! let server = Endpoint::serve("127.0.0.1:0")?;
//! let client = Endpoint::connect(server.local_addr()?)?;
//!
//! client.send(Message::from_buffer(&b"hello"[..]));
//! let deadline = Instant::now() + Duration::from_secs(1);
//! client.wait(deadline)?;
//!
//! server.wait(deadline)?;
//! let child = server.accept().unwrap();
//! child.wait(deadline)?;
//! let msg = child.recv().unwrap();
//! assert_eq!(msg.payload(), b"hello");
//! ```

pub mod error;
pub mod protocol;
pub mod transport;

mod endpoint;
mod poll_group;

pub use endpoint::Endpoint;
pub use error::{MsglinkError, Result};
pub use poll_group::PollGroup;
pub use protocol::Message;
