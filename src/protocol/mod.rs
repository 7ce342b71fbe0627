//! Framing protocol: wire format, messages, and in-flight records.
//!
//! Every message on the wire is exactly [`HEADER_SIZE`] header bytes
//! followed by `length` payload bytes, head-to-tail with no padding or
//! trailer between messages.

mod frame;
mod message;
mod wire_format;

pub(crate) use frame::{RecvFrame, SendFrame};
pub use message::Message;
pub use wire_format::{Header, PayloadKind, HEADER_SIZE, MAGIC, MAX_PAYLOAD_SIZE};
