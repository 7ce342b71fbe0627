//! Messages as handed to and received from endpoints.
//!
//! A [`Message`] is a completed unit of transfer: a payload kind plus an
//! owned payload buffer. In-flight accounting (partial headers and payloads)
//! lives in [`super::frame`]; by the time a caller sees a `Message`, every
//! byte is present.
//!
//! # Example
//!
//! ```
//! use msglink::Message;
//!
//! let msg = Message::from_buffer(&b"hello"[..]);
//! assert_eq!(msg.len(), 5);
//! let payload = msg.into_buffer().unwrap();
//! assert_eq!(&payload[..], b"hello");
//! ```

use bytes::Bytes;

use super::wire_format::{Header, PayloadKind};

/// A discrete, typed message.
///
/// Exclusively owned by whoever currently holds it: the caller until
/// [`Endpoint::send`](crate::Endpoint::send), the endpoint until the message
/// is fully transferred, the caller again after
/// [`Endpoint::recv`](crate::Endpoint::recv). Dropping a message releases
/// its payload.
#[derive(Debug, Clone)]
pub struct Message {
    kind: PayloadKind,
    payload: Bytes,
}

impl Message {
    /// Wrap caller bytes as a buffer message.
    ///
    /// Accepts anything convertible to [`Bytes`]: a `&[u8]` slice is copied,
    /// a `Vec<u8>` or `Bytes` is taken over without copying.
    pub fn from_buffer(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: PayloadKind::Buffer,
            payload: payload.into(),
        }
    }

    /// Assemble a message from decoded wire parts.
    pub(crate) fn from_wire(kind: PayloadKind, payload: Bytes) -> Self {
        Self { kind, payload }
    }

    /// Unwrap the payload, transferring ownership to the caller.
    ///
    /// Returns `None` if the message is not a buffer message (no such kinds
    /// exist on the wire today; the header reserves room for them).
    pub fn into_buffer(self) -> Option<Bytes> {
        match self.kind {
            PayloadKind::Buffer => Some(self.payload),
        }
    }

    /// The payload kind.
    #[inline]
    pub fn kind(&self) -> PayloadKind {
        self.kind
    }

    /// Payload length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty (a zero-length payload is valid).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// A view of the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The header this message carries on the wire.
    pub(crate) fn header(&self) -> Header {
        Header::new(self.kind, self.payload.len() as u64)
    }

    /// Take the payload without the buffer-kind check.
    pub(crate) fn into_payload(self) -> Bytes {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let input = b"some payload bytes";
        let msg = Message::from_buffer(&input[..]);
        assert_eq!(msg.kind(), PayloadKind::Buffer);
        assert_eq!(msg.len(), input.len());

        let out = msg.into_buffer().unwrap();
        assert_eq!(&out[..], input);
    }

    #[test]
    fn test_empty_payload() {
        let msg = Message::from_buffer(Bytes::new());
        assert!(msg.is_empty());
        assert_eq!(msg.len(), 0);
        assert_eq!(msg.into_buffer().unwrap().len(), 0);
    }

    #[test]
    fn test_vec_taken_without_copy() {
        let payload = vec![0xAB; 64];
        let ptr = payload.as_ptr();
        let msg = Message::from_buffer(payload);
        assert_eq!(msg.payload().as_ptr(), ptr);
    }

    #[test]
    fn test_header_reflects_payload() {
        let msg = Message::from_buffer(&[1u8, 2, 3][..]);
        let header = msg.header();
        assert_eq!(header.kind, PayloadKind::Buffer);
        assert_eq!(header.length, 3);
    }
}
