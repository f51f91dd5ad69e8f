//! Waiting for the deadline source's descriptor on the enabled async reactor.
//!
//! Tokio takes precedence when both reactors are enabled.

use std::{io, os::fd::BorrowedFd};

/// Runs `op` until it returns anything but [`io::ErrorKind::WouldBlock`], waiting for `fd` to
/// become readable before each retry.
///
/// `fd` must be in non-blocking mode, or `op` may block the executor.
pub async fn read_when_ready<T>(
    fd: BorrowedFd<'_>,
    op: impl FnMut() -> io::Result<T>,
) -> io::Result<T> {
    imp::read_when_ready(fd, op).await
}

#[cfg(test)]
pub use imp::Runtime;

#[cfg(feature = "tokio")]
mod imp {
    use std::{io, os::fd::BorrowedFd};

    use tokio::io::{Interest, unix::AsyncFd};

    pub async fn read_when_ready<T>(
        fd: BorrowedFd<'_>,
        mut op: impl FnMut() -> io::Result<T>,
    ) -> io::Result<T> {
        let fd = AsyncFd::with_interest(fd, Interest::READABLE)?;
        loop {
            let mut guard = fd.readable().await?;
            // `try_io` clears the readiness flag when `op` reports `WouldBlock`.
            if let Ok(res) = guard.try_io(|_| op()) {
                return res;
            }
        }
    }

    #[cfg(test)]
    pub struct Runtime(tokio::runtime::Runtime);

    #[cfg(test)]
    impl Runtime {
        pub fn new() -> io::Result<Self> {
            tokio::runtime::Builder::new_current_thread()
                .enable_io()
                .build()
                .map(Self)
        }

        pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
            self.0.block_on(fut)
        }
    }
}

#[cfg(all(feature = "async-io", not(feature = "tokio")))]
mod imp {
    use std::{io, os::fd::BorrowedFd};

    use async_io::Async;

    pub async fn read_when_ready<T>(
        fd: BorrowedFd<'_>,
        mut op: impl FnMut() -> io::Result<T>,
    ) -> io::Result<T> {
        // The descriptor is already non-blocking; don't let `Async` touch its flags.
        let fd = Async::new_nonblocking(fd)?;
        fd.read_with(|_| op()).await
    }

    #[cfg(test)]
    pub struct Runtime;

    #[cfg(test)]
    impl Runtime {
        pub fn new() -> io::Result<Self> {
            Ok(Self)
        }

        pub fn block_on<F: Future>(&self, fut: F) -> F::Output {
            async_io::block_on(fut)
        }
    }
}
