//! Wire format encoding and decoding.
//!
//! Implements the 16-byte header format:
//! ```text
//! ┌─────────┬─────────┬────────┬───────────┐
//! │ Magic   │ Pad     │ Kind   │ Length    │
//! │ 5 bytes │ 2 bytes │ 1 byte │ 8 bytes   │
//! │ "DSmsg" │ zero    │        │ uint64 BE │
//! └─────────┴─────────┴────────┴───────────┘
//! ```
//!
//! The length field is Big Endian on the wire. The pad bytes are written as
//! zero and ignored on receive.

use crate::error::{MsglinkError, Result};

/// Header size in bytes (fixed, exactly 16).
pub const HEADER_SIZE: usize = 16;

/// Constant tag identifying a valid header.
pub const MAGIC: &[u8; 5] = b"DSmsg";

/// Maximum payload length a receiver will accept.
///
/// The wire carries an unsigned 64-bit length, but an in-memory payload must
/// fit in the signed pointer-difference range.
pub const MAX_PAYLOAD_SIZE: u64 = isize::MAX as u64;

/// Payload kind carried in the header's kind octet.
///
/// Only in-memory buffers are defined; the octet is reserved for future
/// non-buffer payloads. Receivers reject unknown kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadKind {
    /// An opaque in-memory octet buffer.
    Buffer = 0,
}

impl PayloadKind {
    /// Decode a kind octet from the wire.
    pub fn from_wire(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(PayloadKind::Buffer),
            other => Err(MsglinkError::UnknownPayloadKind(other)),
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Payload kind.
    pub kind: PayloadKind,
    /// Payload length in bytes.
    pub length: u64,
}

impl Header {
    /// Create a new header.
    pub fn new(kind: PayloadKind, length: u64) -> Self {
        Self { kind, length }
    }

    /// Encode header to bytes.
    ///
    /// # Example
    ///
    /// ```
    /// use msglink::protocol::{Header, PayloadKind};
    ///
    /// let header = Header::new(PayloadKind::Buffer, 5);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 16);
    /// assert_eq!(&bytes[..5], b"DSmsg");
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..5].copy_from_slice(MAGIC);
        // buf[5..7] stays zero: pad
        buf[7] = self.kind as u8;
        buf[8..16].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decode a header from exactly [`HEADER_SIZE`] bytes.
    ///
    /// # Errors
    ///
    /// - [`MsglinkError::BadMagic`] if the first five bytes differ from the
    ///   constant tag.
    /// - [`MsglinkError::UnknownPayloadKind`] for a kind octet other than
    ///   `BUFFER`.
    /// - [`MsglinkError::PayloadTooLarge`] if the length exceeds
    ///   [`MAX_PAYLOAD_SIZE`].
    ///
    /// All three are fatal to the receiving endpoint.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        if &buf[0..5] != MAGIC {
            return Err(MsglinkError::BadMagic);
        }
        let kind = PayloadKind::from_wire(buf[7])?;
        let length = u64::from_be_bytes([
            buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
        ]);
        if length > MAX_PAYLOAD_SIZE {
            return Err(MsglinkError::PayloadTooLarge(length));
        }
        Ok(Self { kind, length })
    }
}
