//! In-flight transfer records.
//!
//! An endpoint moves at most one message in each direction at a time; these
//! records track how far along each one is, so that any split the socket
//! imposes (down to one byte per syscall) resumes cleanly.
//!
//! - [`SendFrame`]: the header is materialised once, when the message is
//!   taken off the send queue, and its bytes always complete before any
//!   payload byte goes out.
//! - [`RecvFrame`]: an explicit state machine. The header accumulates to
//!   exactly [`HEADER_SIZE`] bytes, is parsed once (magic validation, kind
//!   and length extraction, payload allocation), and the frame moves on to
//!   the payload. Completion yields a [`Message`].

use bytes::{Bytes, BytesMut};

use super::message::Message;
use super::wire_format::{Header, PayloadKind, HEADER_SIZE};
use crate::error::Result;

/// Outbound message with progress cursors.
#[derive(Debug)]
pub(crate) struct SendFrame {
    /// Header bytes, encoded when the message was dequeued.
    hdr: [u8; HEADER_SIZE],
    hdr_pos: usize,
    payload: Bytes,
    payload_pos: usize,
}

impl SendFrame {
    /// Take ownership of a queued message and materialise its header.
    pub fn new(msg: Message) -> Self {
        let hdr = msg.header().encode();
        Self {
            hdr,
            hdr_pos: 0,
            payload: msg.into_payload(),
            payload_pos: 0,
        }
    }

    /// The next bytes to put on the wire: the unsent header tail, then the
    /// unsent payload tail. Empty once the frame is complete.
    pub fn remaining(&self) -> &[u8] {
        if self.hdr_pos < HEADER_SIZE {
            &self.hdr[self.hdr_pos..]
        } else {
            &self.payload[self.payload_pos..]
        }
    }

    /// Record that `n` bytes of [`Self::remaining`] were transmitted.
    pub fn advance(&mut self, n: usize) {
        if self.hdr_pos < HEADER_SIZE {
            debug_assert!(self.hdr_pos + n <= HEADER_SIZE);
            self.hdr_pos += n;
        } else {
            debug_assert!(self.payload_pos + n <= self.payload.len());
            self.payload_pos += n;
        }
    }

    /// Whether every header and payload byte has been transmitted.
    pub fn is_complete(&self) -> bool {
        self.hdr_pos == HEADER_SIZE && self.payload_pos == self.payload.len()
    }
}

/// Inbound message assembly state.
///
/// Header-incomplete and payload-incomplete are distinct variants rather
/// than a set of flags; the single header parse is the transition between
/// them, which keeps every state/input combination total.
#[derive(Debug)]
pub(crate) enum RecvFrame {
    /// Accumulating the fixed-size header.
    Header { buf: [u8; HEADER_SIZE], pos: usize },
    /// Header parsed; accumulating `buf.len()` payload bytes.
    Payload {
        kind: PayloadKind,
        buf: BytesMut,
        pos: usize,
    },
}

impl RecvFrame {
    pub fn new() -> Self {
        RecvFrame::Header {
            buf: [0u8; HEADER_SIZE],
            pos: 0,
        }
    }

    /// The slice the next read should fill. Never empty for an in-progress
    /// frame: a complete frame is promoted out by [`Self::advance`] before
    /// the caller reads again.
    pub fn window_mut(&mut self) -> &mut [u8] {
        match self {
            RecvFrame::Header { buf, pos } => &mut buf[*pos..],
            RecvFrame::Payload { buf, pos, .. } => &mut buf[*pos..],
        }
    }

    /// Record that `n` bytes of the window were filled.
    ///
    /// Reaching the header boundary performs the single decode step: magic
    /// validation, kind and length extraction, payload allocation. Returns
    /// the completed message once every payload byte is in (immediately at
    /// the boundary for a zero-length payload).
    ///
    /// # Errors
    ///
    /// Header validation failures ([`crate::MsglinkError::BadMagic`],
    /// [`crate::MsglinkError::UnknownPayloadKind`],
    /// [`crate::MsglinkError::PayloadTooLarge`]) are fatal to the endpoint.
    pub fn advance(&mut self, n: usize) -> Result<Option<Message>> {
        match self {
            RecvFrame::Header { buf, pos } => {
                debug_assert!(*pos + n <= HEADER_SIZE);
                *pos += n;
                if *pos < HEADER_SIZE {
                    return Ok(None);
                }
                let header = Header::decode(buf)?;
                if header.length == 0 {
                    return Ok(Some(Message::from_wire(header.kind, Bytes::new())));
                }
                *self = RecvFrame::Payload {
                    kind: header.kind,
                    buf: BytesMut::zeroed(header.length as usize),
                    pos: 0,
                };
                Ok(None)
            }
            RecvFrame::Payload { kind, buf, pos } => {
                debug_assert!(*pos + n <= buf.len());
                *pos += n;
                if *pos < buf.len() {
                    Ok(None)
                } else {
                    let payload = std::mem::take(buf).freeze();
                    Ok(Some(Message::from_wire(*kind, payload)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MsglinkError;

    /// Helper to build a complete wire frame.
    fn make_frame_bytes(payload: &[u8]) -> Vec<u8> {
        let header = Header::new(PayloadKind::Buffer, payload.len() as u64);
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    /// Feed bytes into a RecvFrame in chunks of `step`, collecting messages.
    fn feed(frame_bytes: &[u8], step: usize) -> Vec<Message> {
        let mut out = Vec::new();
        let mut frame = RecvFrame::new();
        let mut offset = 0;
        while offset < frame_bytes.len() {
            let window = frame.window_mut();
            let n = step.min(window.len()).min(frame_bytes.len() - offset);
            window[..n].copy_from_slice(&frame_bytes[offset..offset + n]);
            offset += n;
            if let Some(msg) = frame.advance(n).unwrap() {
                out.push(msg);
                frame = RecvFrame::new();
            }
        }
        out
    }

    #[test]
    fn test_send_frame_header_before_payload() {
        let mut frame = SendFrame::new(Message::from_buffer(&b"payload"[..]));

        // First window is the full header.
        assert_eq!(frame.remaining().len(), HEADER_SIZE);
        assert_eq!(&frame.remaining()[..5], b"DSmsg");

        // Partial header write keeps us in the header.
        frame.advance(3);
        assert_eq!(frame.remaining().len(), HEADER_SIZE - 3);
        frame.advance(HEADER_SIZE - 3);

        // Then the payload, also splittable.
        assert_eq!(frame.remaining(), b"payload");
        frame.advance(4);
        assert_eq!(frame.remaining(), b"oad");
        frame.advance(3);
        assert!(frame.is_complete());
        assert!(frame.remaining().is_empty());
    }

    #[test]
    fn test_send_frame_empty_payload() {
        let mut frame = SendFrame::new(Message::from_buffer(Bytes::new()));
        assert_eq!(frame.remaining().len(), HEADER_SIZE);
        frame.advance(HEADER_SIZE);
        assert!(frame.is_complete());
    }

    #[test]
    fn test_recv_whole_frame_at_once() {
        let bytes = make_frame_bytes(b"hello");
        let msgs = feed(&bytes, bytes.len());
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].payload(), b"hello");
    }

    #[test]
    fn test_recv_byte_at_a_time() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let bytes = make_frame_bytes(&payload);
        let msgs = feed(&bytes, 1);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].payload(), &payload[..]);
    }

    #[test]
    fn test_recv_zero_length_completes_at_header() {
        let bytes = make_frame_bytes(b"");
        assert_eq!(bytes.len(), HEADER_SIZE);
        let msgs = feed(&bytes, 1);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].is_empty());
    }

    #[test]
    fn test_recv_back_to_back_frames() {
        let mut bytes = make_frame_bytes(b"first");
        bytes.extend_from_slice(&make_frame_bytes(b""));
        bytes.extend_from_slice(&make_frame_bytes(b"third"));
        let msgs = feed(&bytes, 7);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].payload(), b"first");
        assert!(msgs[1].is_empty());
        assert_eq!(msgs[2].payload(), b"third");
    }

    #[test]
    fn test_recv_bad_magic_is_fatal() {
        let mut bytes = make_frame_bytes(b"hello");
        bytes[0] = b'X';

        let mut frame = RecvFrame::new();
        frame.window_mut()[..HEADER_SIZE].copy_from_slice(&bytes[..HEADER_SIZE]);
        assert!(matches!(
            frame.advance(HEADER_SIZE),
            Err(MsglinkError::BadMagic)
        ));
    }

    #[test]
    fn test_recv_unknown_kind_is_fatal() {
        let mut bytes = make_frame_bytes(b"");
        bytes[7] = 9;

        let mut frame = RecvFrame::new();
        frame.window_mut()[..HEADER_SIZE].copy_from_slice(&bytes[..HEADER_SIZE]);
        assert!(matches!(
            frame.advance(HEADER_SIZE),
            Err(MsglinkError::UnknownPayloadKind(9))
        ));
    }

    #[test]
    fn test_recv_oversized_length_is_fatal() {
        let mut bytes = make_frame_bytes(b"");
        bytes[8..16].copy_from_slice(&u64::MAX.to_be_bytes());

        let mut frame = RecvFrame::new();
        frame.window_mut()[..HEADER_SIZE].copy_from_slice(&bytes[..HEADER_SIZE]);
        assert!(matches!(
            frame.advance(HEADER_SIZE),
            Err(MsglinkError::PayloadTooLarge(_))
        ));
    }
}
