// SPDX-License-Identifier: GPL-3.0-only

//! Capture state machine and video poll loop
//!
//! ```text
//! Idle --configure--> Configured --start--> Streaming
//!   ^                     |                     |
//!   +--------stop---------+---------stop--------+
//! ```
//!
//! The poll loop runs on its own thread. Each iteration waits on the capture
//! descriptor and the loop's cancellation channel, then dequeues at most one
//! buffer and either requeues it or lends it to the frame callback.

use super::buffer::BufferPool;
use super::types::{
    BackingMode, CaptureState, FrameCallback, PayloadCheck, StreamProfile, classify_payload,
};
use super::{V4l2Device, VideoDevice};
use crate::backends::cancel::{CancellationChannel, WaitOutcome, wait_readable};
use crate::backends::frame_loop::{CaptureLoopController, LoopAction};
use crate::backends::notification::{Notification, NotificationHandler};
use crate::config::BackendConfig;
use crate::constants::MIN_BUFFER_COUNT;
use crate::errors::{BackendError, BackendResult};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One capture node's configure → start → stop lifecycle
pub struct CaptureSession {
    device: Arc<dyn VideoDevice>,
    mode: BackingMode,
    poll_timeout: Duration,
    state: CaptureState,
    profile: Option<StreamProfile>,
    pool: Option<Arc<BufferPool>>,
    capture_loop: Option<CaptureLoopController>,
    /// Set while stream-on is in effect; whoever clears it issues stream-off
    stream_active: Arc<AtomicBool>,
    callbacks_enabled: Arc<AtomicBool>,
}

impl CaptureSession {
    /// Open a V4L2 capture node
    pub fn open(path: &Path, config: &BackendConfig) -> BackendResult<Self> {
        let device = V4l2Device::open(path)?;
        let mode = if config.use_memory_map {
            BackingMode::Mapped
        } else {
            BackingMode::UserAllocated
        };
        Ok(Self::with_device(Arc::new(device), mode, config.poll_timeout()))
    }

    /// Build a session over any video device implementation
    pub fn with_device(
        device: Arc<dyn VideoDevice>,
        mode: BackingMode,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            device,
            mode,
            poll_timeout,
            state: CaptureState::Idle,
            profile: None,
            pool: None,
            capture_loop: None,
            stream_active: Arc::new(AtomicBool::new(false)),
            callbacks_enabled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn mode(&self) -> BackingMode {
        self.mode
    }

    /// Committed profile, if any
    pub fn profile(&self) -> Option<&StreamProfile> {
        self.profile.as_ref()
    }

    /// Buffer pool of the committed profile
    pub fn pool(&self) -> Option<&Arc<BufferPool>> {
        self.pool.as_ref()
    }

    fn sequence_error(&self, operation: &'static str) -> BackendError {
        BackendError::Sequence {
            operation,
            state: self.state.as_str(),
        }
    }

    /// Commit a streaming profile and allocate its buffers
    pub fn configure(&mut self, profile: StreamProfile, buffer_count: u32) -> BackendResult<()> {
        if self.state != CaptureState::Idle {
            return Err(self.sequence_error("configure"));
        }

        let image_size = self.device.set_format(&profile)?;
        self.device.set_frame_rate(profile.frame_rate)?;

        let granted = self.device.request_buffers(buffer_count, self.mode)?;
        let pool = if granted < MIN_BUFFER_COUNT {
            Err(BackendError::InsufficientBuffers { granted })
        } else {
            BufferPool::allocate(Arc::clone(&self.device), self.mode, granted, image_size)
        };

        match pool {
            Ok(pool) => {
                info!(profile = %profile, buffers = granted, mode = ?self.mode, "Profile configured");
                self.pool = Some(Arc::new(pool));
                self.profile = Some(profile);
                self.state = CaptureState::Configured;
                Ok(())
            }
            Err(e) => {
                self.release_reservation();
                Err(e)
            }
        }
    }

    /// Submit all buffers, turn the stream on and spawn the poll loop
    pub fn start(
        &mut self,
        callback: FrameCallback,
        handler: NotificationHandler,
    ) -> BackendResult<()> {
        if self.state != CaptureState::Configured {
            return Err(self.sequence_error("start"));
        }
        let (Some(pool), Some(profile)) = (self.pool.clone(), self.profile.clone()) else {
            return Err(self.sequence_error("start"));
        };

        if let Err(e) = self.begin_streaming(&pool) {
            self.abort_streaming(&pool);
            return Err(e);
        }

        self.callbacks_enabled.store(true, Ordering::SeqCst);
        let mut poll_loop = PollLoop {
            device: Arc::clone(&self.device),
            pool: Arc::clone(&pool),
            profile,
            callback,
            handler,
            callbacks_enabled: Arc::clone(&self.callbacks_enabled),
            stream_active: Arc::clone(&self.stream_active),
            timeout: self.poll_timeout,
        };

        match CaptureLoopController::start("video-capture", move |cancel| poll_loop.iterate(cancel)) {
            Ok(controller) => {
                self.capture_loop = Some(controller);
                self.state = CaptureState::Streaming;
                Ok(())
            }
            Err(source) => {
                self.callbacks_enabled.store(false, Ordering::SeqCst);
                self.abort_streaming(&pool);
                Err(BackendError::DriverProtocol {
                    request: "spawn capture thread",
                    source,
                })
            }
        }
    }

    fn begin_streaming(&self, pool: &BufferPool) -> BackendResult<()> {
        pool.submit_all()?;
        self.device.stream_on()?;
        self.stream_active.store(true, Ordering::SeqCst);
        debug!(buffers = pool.len(), "Stream on");
        Ok(())
    }

    /// Take back every queued buffer after a failed start
    fn abort_streaming(&self, pool: &BufferPool) {
        self.stream_active.store(false, Ordering::SeqCst);
        // Stream-off also dequeues buffers that were queued without streaming
        if let Err(e) = self.device.stream_off() {
            warn!(error = %e, "Stream off after failed start");
        }
        pool.reclaim_from_kernel();
    }

    /// Stop streaming, release every buffer and return to idle
    ///
    /// Safe to call in any state; calls after the first are no-ops. Teardown
    /// always completes; the first error met along the way is returned.
    pub fn stop(&mut self) -> BackendResult<()> {
        if self.state == CaptureState::Idle {
            return Ok(());
        }

        self.callbacks_enabled.store(false, Ordering::SeqCst);
        if let Some(mut capture_loop) = self.capture_loop.take() {
            capture_loop.stop();
        }

        let mut first_error = None;
        if let Some(pool) = self.pool.take() {
            pool.deactivate();
            if self.stream_active.swap(false, Ordering::SeqCst)
                && let Err(e) = self.device.stream_off()
            {
                first_error = Some(e);
            }
            pool.reclaim_from_kernel();

            match Arc::try_unwrap(pool) {
                Ok(pool) => {
                    drop(pool);
                    self.release_reservation_into(&mut first_error);
                }
                Err(pool) if self.mode == BackingMode::UserAllocated => {
                    debug!(outstanding = pool.outstanding(), "Frames still held after stop");
                    self.release_reservation_into(&mut first_error);
                }
                Err(pool) => {
                    // Mapped buffers cannot be freed while a frame still maps one
                    warn!(
                        outstanding = pool.outstanding(),
                        "Frames still held after stop; kernel buffers kept until the node closes"
                    );
                }
            }
        }

        self.profile = None;
        self.state = CaptureState::Idle;
        info!("Capture stopped");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn release_reservation(&self) {
        if let Err(e) = self.device.request_buffers(0, self.mode) {
            warn!(error = %e, "Failed to release kernel buffers");
        }
    }

    fn release_reservation_into(&self, first_error: &mut Option<BackendError>) {
        if let Err(e) = self.device.request_buffers(0, self.mode) {
            first_error.get_or_insert(e);
        }
    }

    /// Requeue dequeued buffers instead of delivering them
    pub fn pause_callbacks(&self) {
        self.callbacks_enabled.store(false, Ordering::SeqCst);
    }

    /// Resume delivering frames to the callback
    pub fn resume_callbacks(&self) {
        if self.state == CaptureState::Streaming {
            self.callbacks_enabled.store(true, Ordering::SeqCst);
        }
    }

    pub fn callbacks_enabled(&self) -> bool {
        self.callbacks_enabled.load(Ordering::SeqCst)
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.state != CaptureState::Idle
            && let Err(e) = self.stop()
        {
            error!(error = %e, "Capture teardown failed");
        }
    }
}

/// State owned by the poll loop thread
struct PollLoop {
    device: Arc<dyn VideoDevice>,
    pool: Arc<BufferPool>,
    profile: StreamProfile,
    callback: FrameCallback,
    handler: NotificationHandler,
    callbacks_enabled: Arc<AtomicBool>,
    stream_active: Arc<AtomicBool>,
    timeout: Duration,
}

impl PollLoop {
    fn iterate(&mut self, cancel: &CancellationChannel) -> LoopAction {
        match wait_readable(self.device.fd(), cancel, self.timeout) {
            Err(e) => self.fail(format!("readiness wait failed: {}", e)),
            Ok(WaitOutcome::TimedOut) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Frames didn't arrive within the poll timeout"
                );
                let outstanding = self.pool.outstanding();
                if outstanding > 0 && outstanding == self.pool.len() {
                    (self.handler)(Notification::Backpressure { outstanding });
                }
                LoopAction::Continue
            }
            Ok(WaitOutcome::Cancelled) => {
                info!("Stream finished");
                LoopAction::Stop
            }
            Ok(WaitOutcome::Ready) => match self.dispatch() {
                Ok(()) => LoopAction::Continue,
                Err(e) => self.fail(e.to_string()),
            },
        }
    }

    /// Dequeue one buffer and route it
    fn dispatch(&mut self) -> BackendResult<()> {
        let Some(done) = self.device.dequeue_buffer(self.pool.mode())? else {
            return Ok(());
        };
        let index = done.index as usize;
        if index >= self.pool.len() {
            return Err(BackendError::DriverProtocol {
                request: "VIDIOC_DQBUF",
                source: io::Error::other(format!("driver returned unknown buffer {}", index)),
            });
        }
        self.pool.mark_dequeued(index);

        if !self.callbacks_enabled.load(Ordering::SeqCst) {
            return self.pool.requeue(index);
        }

        let expected = self.pool.frame_size(index);
        match classify_payload(done.bytes_used, expected) {
            PayloadCheck::Empty => {
                warn!(index, "Empty frame has arrived");
                self.pool.requeue(index)
            }
            PayloadCheck::Partial { percentage } => {
                warn!(index, bytes_used = done.bytes_used, expected, "Incomplete frame");
                (self.handler)(Notification::PartialFrame {
                    bytes_used: done.bytes_used,
                    expected,
                    percentage,
                });
                self.pool.requeue(index)
            }
            PayloadCheck::Complete => {
                if let Some(frame) =
                    self.pool
                        .hand_out(index, done.bytes_used, done.sequence, done.timestamp)
                {
                    (self.callback)(&self.profile, frame);
                }
                Ok(())
            }
        }
    }

    /// Tear down kernel streaming and report a fatal loop error
    fn fail(&self, message: String) -> LoopAction {
        error!(error = %message, "Capture loop failed");
        if self.stream_active.swap(false, Ordering::SeqCst) {
            self.pool.deactivate();
            if let Err(e) = self.device.stream_off() {
                warn!(error = %e, "Stream off after loop failure");
            }
            self.pool.reclaim_from_kernel();
        }
        (self.handler)(Notification::StreamFailed { error: message });
        LoopAction::Stop
    }
}
