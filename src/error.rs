//! Error types for msglink.

use std::io;

use thiserror::Error;

/// Main error type for all msglink operations.
#[derive(Debug, Error)]
pub enum MsglinkError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Received header does not start with the magic tag.
    #[error("bad magic in message header")]
    BadMagic,

    /// Received header carries a payload kind this implementation rejects.
    #[error("unknown payload kind: {0}")]
    UnknownPayloadKind(u8),

    /// Received length field does not fit in addressable memory.
    #[error("payload length {0} out of range")]
    PayloadTooLarge(u64),

    /// Peer closed the connection in the middle of a message.
    #[error("connection closed mid-message")]
    ConnectionClosed,

    /// Endpoint is already a member of this poll group.
    #[error("endpoint is already a member of this poll group")]
    AlreadyMember,

    /// Endpoint is a member of a different poll group.
    #[error("endpoint belongs to a different poll group")]
    ForeignMember,

    /// Endpoint is not a member of this poll group.
    #[error("endpoint is not a member of this poll group")]
    NotAMember,
}

impl MsglinkError {
    /// The errno most closely describing this error.
    ///
    /// This is the code captured by a dying endpoint and reported by
    /// [`Endpoint::geterror`](crate::Endpoint::geterror). Protocol
    /// violations map to deterministic codes rather than whatever errno a
    /// prior syscall left behind.
    pub fn errno(&self) -> i32 {
        match self {
            MsglinkError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            MsglinkError::BadMagic => libc::EPROTO,
            MsglinkError::UnknownPayloadKind(_) => libc::EPROTO,
            MsglinkError::PayloadTooLarge(_) => libc::EMSGSIZE,
            MsglinkError::ConnectionClosed => libc::ECONNRESET,
            MsglinkError::AlreadyMember => libc::EEXIST,
            MsglinkError::ForeignMember => libc::EINVAL,
            MsglinkError::NotAMember => libc::ENOENT,
        }
    }
}

/// Result type alias using MsglinkError.
pub type Result<T> = std::result::Result<T, MsglinkError>;

/// Whether an I/O error means "no progress this call, try again later".
///
/// These are the errnos a non-blocking socket reports while an operation is
/// simply not ready yet: EINTR, EAGAIN/EWOULDBLOCK, EINPROGRESS, EALREADY,
/// EISCONN. Everything else is fatal to the endpoint.
pub(crate) fn is_temporary(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    ) || matches!(
        err.raw_os_error(),
        Some(libc::EINPROGRESS) | Some(libc::EALREADY) | Some(libc::EISCONN)
    )
}
