//! The Linux deadline source, backed by a `timerfd`.

use std::{
    ffi::c_int,
    fmt,
    fs::File,
    io::{self, Read},
    mem,
    os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd},
};

use libc::{
    CLOCK_MONOTONIC, TFD_CLOEXEC, TFD_NONBLOCK, TFD_TIMER_ABSTIME, itimerspec, timerfd_create,
    timerfd_settime,
};

use crate::{time::Usec, timer::DeadlineSource};

fn cvt(ret: c_int) -> io::Result<c_int /* never -1 */> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// A non-blocking `CLOCK_MONOTONIC` timerfd, armed with absolute deadlines.
///
/// The descriptor becomes readable once the armed deadline has passed. Reading it yields the
/// number of expirations since the last read and resets readiness.
pub struct TimerFd {
    file: File,
}

impl fmt::Debug for TimerFd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerFd")
            .field("fd", &self.as_raw_fd())
            .finish()
    }
}

impl AsFd for TimerFd {
    #[inline]
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl AsRawFd for TimerFd {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl IntoRawFd for TimerFd {
    #[inline]
    fn into_raw_fd(self) -> RawFd {
        self.file.into_raw_fd()
    }
}

impl TimerFd {
    /// Creates a new, disarmed timerfd.
    pub fn new() -> io::Result<Self> {
        unsafe {
            let fd = OwnedFd::from_raw_fd(cvt(timerfd_create(
                CLOCK_MONOTONIC,
                TFD_CLOEXEC | TFD_NONBLOCK,
            ))?);
            Ok(Self {
                file: File::from(fd),
            })
        }
    }

    /// Arms the timer to fire at the absolute `deadline`, or disarms it if `deadline` is
    /// [`None`].
    pub fn set(&self, deadline: Option<Usec>) -> io::Result<()> {
        // An all-zero `it_value` disarms the timer.
        let mut its: itimerspec = unsafe { mem::zeroed() };
        if let Some(deadline) = deadline {
            its.it_value = deadline.to_timespec();
        }
        unsafe {
            cvt(timerfd_settime(
                self.as_raw_fd(),
                TFD_TIMER_ABSTIME,
                &its,
                std::ptr::null_mut(),
            ))?;
        }
        Ok(())
    }

    /// Reads the expiration counter.
    ///
    /// Fails with [`io::ErrorKind::WouldBlock`] if the timer has not expired since the last read.
    pub fn read_expirations(&self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        let n = (&self.file).read(&mut buf)?;
        if n != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short read of {n} bytes from timerfd"),
            ));
        }
        Ok(u64::from_ne_bytes(buf))
    }
}

impl DeadlineSource for TimerFd {
    fn now(&self) -> io::Result<Usec> {
        Usec::now()
    }

    fn arm(&mut self, deadline: Option<Usec>) -> io::Result<()> {
        self.set(deadline)
    }

    fn consume(&self) -> io::Result<u64> {
        self.read_expirations()
    }

    fn fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.as_fd())
    }
}
