//! Thin facade over `poll(2)`.
//!
//! The only place the crate blocks. Timeouts are relative `Duration`s,
//! rounded up to the next millisecond so a short positive deadline cannot
//! degenerate into a busy spin.

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Sleep until `fd` reports one of `events`, or the timeout elapses.
///
/// Returns `Ok(Some(revents))` on readiness and `Ok(None)` on timeout.
/// Signal interruption surfaces as `ErrorKind::Interrupted`; callers treat
/// it as a timeout.
pub(crate) fn wait_single(
    fd: RawFd,
    events: libc::c_short,
    timeout: Duration,
) -> io::Result<Option<libc::c_short>> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    let n = wait_many(std::slice::from_mut(&mut pfd), timeout)?;
    Ok((n > 0).then_some(pfd.revents))
}

/// Sleep until any descriptor in `pfds` reports a requested event, or the
/// timeout elapses. Returns the number of ready descriptors (0 on timeout).
pub(crate) fn wait_many(pfds: &mut [libc::pollfd], timeout: Duration) -> io::Result<usize> {
    let rc = unsafe { libc::poll(pfds.as_mut_ptr(), pfds.len() as libc::nfds_t, timeout_ms(timeout)) };
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Round a duration up to whole milliseconds, clamped to poll's i32 range.
fn timeout_ms(timeout: Duration) -> libc::c_int {
    let ms = timeout.as_millis();
    let ms = if Duration::from_millis(ms as u64) < timeout {
        ms + 1
    } else {
        ms
    };
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}
