// SPDX-License-Identifier: GPL-3.0-only

//! Cancellation channel and bounded readiness wait
//!
//! A capture loop blocks in exactly one place: [`wait_readable`], which waits
//! on the data descriptor and a private [`CancellationChannel`] together. A
//! signal on the channel wakes the wait immediately; without one the wait
//! returns after its timeout, so cancellation latency is bounded by one
//! timeout interval even when the device never becomes ready.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// One-shot cancellation signal backed by an eventfd
#[derive(Debug)]
pub struct CancellationChannel {
    fd: OwnedFd,
    signalled: AtomicBool,
}

impl CancellationChannel {
    /// Create an unsignalled channel
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: eventfd returned a fresh descriptor we now exclusively own
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            fd,
            signalled: AtomicBool::new(false),
        })
    }

    /// Signal cancellation
    ///
    /// Returns `Ok(false)` if the channel was already signalled; the
    /// descriptor is only written once.
    pub fn signal(&self) -> io::Result<bool> {
        if self.signalled.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let one: u64 = 1;
        let written = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if written < 0 {
            self.signalled.store(false, Ordering::SeqCst);
            return Err(io::Error::last_os_error());
        }
        debug!("Cancellation signalled");
        Ok(true)
    }

    /// Whether [`signal`](Self::signal) has been called
    pub fn is_signalled(&self) -> bool {
        self.signalled.load(Ordering::SeqCst)
    }
}

impl AsRawFd for CancellationChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

/// Result of one bounded readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The data descriptor has input
    Ready,
    /// The cancellation channel was signalled
    Cancelled,
    /// Neither descriptor became ready within the timeout
    TimedOut,
}

/// Wait up to `timeout` for input on `data_fd` or a cancellation signal
///
/// Cancellation wins when both are ready. An error or hang-up condition on
/// the data descriptor is reported as an error.
pub fn wait_readable(
    data_fd: RawFd,
    cancel: &CancellationChannel,
    timeout: Duration,
) -> io::Result<WaitOutcome> {
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;
    let mut fds = [
        libc::pollfd {
            fd: data_fd,
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: cancel.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
    ];

    loop {
        let result = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if result == 0 {
            return Ok(WaitOutcome::TimedOut);
        }
        if fds[1].revents & libc::POLLIN != 0 {
            return Ok(WaitOutcome::Cancelled);
        }
        if fds[0].revents & libc::POLLIN != 0 {
            return Ok(WaitOutcome::Ready);
        }
        if fds[0].revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(io::Error::other(format!(
                "descriptor {} reported poll condition {:#x}",
                data_fd, fds[0].revents
            )));
        }
    }
}
