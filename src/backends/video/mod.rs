// SPDX-License-Identifier: GPL-3.0-only

//! Video capture: buffer pool, capture session and poll loop
//!
//! A [`CaptureSession`] drives one capture node through
//! `Idle → Configured → Streaming → Idle`. Kernel access goes through the
//! [`VideoDevice`] trait; [`V4l2Device`] is the real implementation.

pub mod buffer;
pub mod session;
pub mod types;
pub mod v4l2_device;

pub use buffer::{BufferMemory, BufferPool, Frame, SlotState, SlotView};
pub use session::CaptureSession;
pub use types::{
    BackingMode, CaptureState, FrameCallback, PayloadCheck, StreamProfile, classify_payload,
};
pub use v4l2_device::V4l2Device;

use crate::errors::BackendResult;
use std::os::fd::RawFd;
use std::time::Duration;

/// Layout of one kernel buffer as reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    /// Payload capacity in bytes, excluding any metadata block
    pub length: usize,
    /// Mapping offset for memory-mapped buffers
    pub offset: u32,
}

/// A buffer the driver has finished filling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    pub index: u32,
    pub bytes_used: usize,
    pub sequence: u32,
    pub timestamp: Duration,
}

/// Kernel video-capture control interface for one open node
///
/// Implementations must be usable from the poll loop thread and from the
/// thread that releases frames at the same time.
pub trait VideoDevice: Send + Sync {
    /// Descriptor that becomes readable when a filled buffer can be dequeued
    fn fd(&self) -> RawFd;

    /// Negotiate resolution and pixel format; returns the frame size in bytes
    fn set_format(&self, profile: &StreamProfile) -> BackendResult<usize>;

    /// Negotiate the frame interval
    fn set_frame_rate(&self, frame_rate: u32) -> BackendResult<()>;

    /// Request `count` buffers; returns the number granted. A count of zero
    /// releases the reservation.
    fn request_buffers(&self, count: u32, mode: BackingMode) -> BackendResult<u32>;

    fn query_buffer(&self, index: u32, mode: BackingMode) -> BackendResult<BufferInfo>;

    /// Map a kernel buffer into the process
    fn map_buffer(&self, info: &BufferInfo) -> BackendResult<BufferMemory>;

    /// Submit a buffer to the kernel for filling
    fn queue_buffer(&self, index: u32, memory: &BufferMemory, mode: BackingMode)
    -> BackendResult<()>;

    /// Take a filled buffer back; `None` when nothing is ready yet
    fn dequeue_buffer(&self, mode: BackingMode) -> BackendResult<Option<Dequeued>>;

    fn stream_on(&self) -> BackendResult<()>;

    fn stream_off(&self) -> BackendResult<()>;
}
