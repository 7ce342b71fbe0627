//! Socket and multiplex facades.
//!
//! Everything platform-facing lives here: the non-blocking TCP link and the
//! `poll(2)` wrapper. The endpoint state machine above this layer performs
//! no syscalls of its own.

mod link;
pub(crate) mod poll;

pub use link::Link;
