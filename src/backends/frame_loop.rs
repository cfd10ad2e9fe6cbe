// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for capture loops
//!
//! Both the video poll loop and the HID sensor loop run on a dedicated thread
//! owned by a [`CaptureLoopController`]. The controller owns the loop's
//! [`CancellationChannel`]; stopping signals the channel, which wakes a loop
//! blocked in [`wait_readable`](super::cancel::wait_readable), and then joins
//! the thread.

use super::cancel::CancellationChannel;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Action returned by the capture loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a capture loop running in a separate thread
///
/// # Example
///
/// ```ignore
/// let controller = CaptureLoopController::start("video-capture", move |cancel| {
///     match wait_readable(fd, cancel, timeout) {
///         Ok(WaitOutcome::Ready) => { dequeue_and_dispatch(); LoopAction::Continue }
///         Ok(WaitOutcome::TimedOut) => LoopAction::Continue,
///         Ok(WaitOutcome::Cancelled) | Err(_) => LoopAction::Stop,
///     }
/// })?;
///
/// controller.stop();
/// ```
pub struct CaptureLoopController {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Wakes the loop out of its readiness wait
    cancel: Arc<CancellationChannel>,
    /// Name for logging
    name: String,
}

impl CaptureLoopController {
    /// Start a new capture loop in a separate thread
    ///
    /// The closure is called repeatedly until it returns [`LoopAction::Stop`]
    /// or the controller is stopped. It receives the loop's cancellation
    /// channel to wait on alongside its data descriptor.
    pub fn start<F>(name: &str, mut loop_fn: F) -> io::Result<Self>
    where
        F: FnMut(&CancellationChannel) -> LoopAction + Send + 'static,
    {
        let cancel = Arc::new(CancellationChannel::new()?);
        let loop_cancel = Arc::clone(&cancel);
        let thread_name = name.to_string();

        info!(name = %name, "Starting capture loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %thread_name, "Capture loop thread started");

                loop {
                    if loop_cancel.is_signalled() {
                        debug!(name = %thread_name, "Stop signal received");
                        break;
                    }

                    match loop_fn(&loop_cancel) {
                        LoopAction::Continue => {}
                        LoopAction::Stop => {
                            debug!(name = %thread_name, "Loop requested stop");
                            break;
                        }
                    }
                }

                info!(name = %thread_name, "Capture loop thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            cancel,
            name: name.to_string(),
        })
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop without waiting for it
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting capture loop stop");
        if let Err(e) = self.cancel.signal() {
            warn!(name = %self.name, error = %e, "Failed to signal cancellation");
        }
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending the stop signal
    pub fn join(&mut self) {
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // Stopping from inside the loop's own callback; the loop exits on
            // its next check of the signal
            debug!(name = %self.name, "Stop requested from the capture thread");
            return;
        }
        debug!(name = %self.name, "Waiting for capture loop thread to finish");
        if let Err(e) = handle.join() {
            warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
        } else {
            debug!(name = %self.name, "Capture loop thread finished");
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::cancel::{WaitOutcome, wait_readable};
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    #[test]
    fn test_basic_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start("test-loop", move |_| {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            if count >= 10 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        })
        .unwrap();

        controller.join();

        assert_eq!(counter.load(Ordering::SeqCst), 11); // 0-10 inclusive
    }

    #[test]
    fn test_stop_wakes_blocked_wait() {
        let (data, _peer) = UnixStream::pair().unwrap();
        let fd = data.as_raw_fd();
        let timeouts = Arc::new(AtomicU32::new(0));
        let timeouts_clone = Arc::clone(&timeouts);

        let mut controller = CaptureLoopController::start("test-blocked", move |cancel| {
            match wait_readable(fd, cancel, Duration::from_secs(5)) {
                Ok(WaitOutcome::TimedOut) => {
                    timeouts_clone.fetch_add(1, Ordering::SeqCst);
                    LoopAction::Continue
                }
                Ok(WaitOutcome::Ready) => LoopAction::Continue,
                Ok(WaitOutcome::Cancelled) | Err(_) => LoopAction::Stop,
            }
        })
        .unwrap();

        thread::sleep(Duration::from_millis(30));
        let started = Instant::now();
        controller.stop();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(timeouts.load(Ordering::SeqCst), 0);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_is_running() {
        let controller = CaptureLoopController::start("test-running", |_| {
            thread::sleep(Duration::from_millis(20));
            LoopAction::Continue
        })
        .unwrap();

        assert!(controller.is_running());

        // Drop will stop it
        drop(controller);
    }

    #[test]
    fn test_stop_twice_is_harmless() {
        let mut controller =
            CaptureLoopController::start("test-double-stop", |_| LoopAction::Continue).unwrap();
        controller.stop();
        controller.stop();
        assert!(!controller.is_running());
    }
}
