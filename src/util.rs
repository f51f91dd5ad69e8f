#[cfg(any(feature = "tokio", feature = "async-io"))]
pub mod r#async;

use std::{
    io,
    os::fd::{AsRawFd, BorrowedFd},
    time::Duration,
};

/// Waits up to `timeout` for `fd` to become readable.
///
/// A zero `timeout` just checks the current state.
pub fn poll_readable(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().try_into().unwrap_or(libc::c_int::MAX);
    match unsafe { libc::poll(&mut pollfd, 1, timeout_ms) } {
        -1 => Err(io::Error::last_os_error()),
        0 => Ok(false),
        _ => Ok(pollfd.revents & libc::POLLIN != 0),
    }
}

#[cfg(test)]
mod tests {
    use std::os::fd::AsFd;

    use crate::{time::Usec, timerfd::TimerFd};

    use super::*;

    #[test]
    fn timerfd_is_nonblocking() -> io::Result<()> {
        let tfd = TimerFd::new()?;
        let flags = unsafe { libc::fcntl(tfd.as_raw_fd(), libc::F_GETFL) };
        assert_ne!(flags, -1);
        assert_ne!(flags & libc::O_NONBLOCK, 0);
        Ok(())
    }

    #[test]
    fn waits_for_deadline() -> io::Result<()> {
        let tfd = TimerFd::new()?;
        assert!(!poll_readable(tfd.as_fd(), Duration::ZERO)?);

        tfd.set(Some(Usec::now()?.add_millis(10)))?;
        assert!(poll_readable(tfd.as_fd(), Duration::from_secs(5))?);
        assert!(poll_readable(tfd.as_fd(), Duration::ZERO)?);
        Ok(())
    }
}
