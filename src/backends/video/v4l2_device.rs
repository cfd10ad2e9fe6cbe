// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 capture node
//!
//! Format and frame-rate negotiation go through the `v4l` crate. Buffer
//! management needs both user-pointer and memory-mapped I/O with per-buffer
//! control, so the streaming ioctls are issued directly.

use super::{BackingMode, BufferInfo, BufferMemory, Dequeued, StreamProfile, VideoDevice};
use crate::errors::{BackendError, BackendResult};
use std::io;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use v4l::capability::Flags;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::video::capture::Parameters;
use v4l::{Format, FourCC};

// ===== V4L2 ioctl Numbers =====

const VIDIOC_REQBUFS: libc::c_ulong = 0xC0145608;
const VIDIOC_QUERYBUF: libc::c_ulong = 0xC0585609;
const VIDIOC_QBUF: libc::c_ulong = 0xC058560F;
const VIDIOC_DQBUF: libc::c_ulong = 0xC0585611;
const VIDIOC_STREAMON: libc::c_ulong = 0x40045612;
const VIDIOC_STREAMOFF: libc::c_ulong = 0x40045613;

const V4L2_BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
const V4L2_MEMORY_MMAP: u32 = 1;
const V4L2_MEMORY_USERPTR: u32 = 2;

// ===== V4L2 ioctl Structures =====

#[repr(C)]
struct V4l2RequestBuffers {
    count: u32,
    type_: u32,
    memory: u32,
    capabilities: u32,
    flags: u8,
    reserved: [u8; 3],
}

#[allow(dead_code)]
#[repr(C)]
struct V4l2Timecode {
    type_: u32,
    flags: u32,
    frames: u8,
    seconds: u8,
    minutes: u8,
    hours: u8,
    userbits: [u8; 4],
}

#[allow(dead_code)]
#[repr(C)]
union V4l2BufferM {
    offset: u32,
    userptr: libc::c_ulong,
    planes: *mut libc::c_void,
    fd: i32,
}

#[allow(dead_code)]
#[repr(C)]
struct V4l2Buffer {
    index: u32,
    type_: u32,
    bytesused: u32,
    flags: u32,
    field: u32,
    timestamp: libc::timeval,
    timecode: V4l2Timecode,
    sequence: u32,
    memory: u32,
    m: V4l2BufferM,
    length: u32,
    reserved2: u32,
    request_fd: i32,
}

#[cfg(target_pointer_width = "64")]
const _: () = assert!(std::mem::size_of::<V4l2Buffer>() == 88);
const _: () = assert!(std::mem::size_of::<V4l2RequestBuffers>() == 20);

impl V4l2Buffer {
    fn new(index: u32, mode: BackingMode) -> Self {
        // SAFETY: all-zero is a valid v4l2_buffer
        let mut buf: Self = unsafe { std::mem::zeroed() };
        buf.index = index;
        buf.type_ = V4L2_BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = memory_type(mode);
        buf
    }
}

fn memory_type(mode: BackingMode) -> u32 {
    match mode {
        BackingMode::Mapped => V4L2_MEMORY_MMAP,
        BackingMode::UserAllocated => V4L2_MEMORY_USERPTR,
    }
}

/// Issue an ioctl, retrying when interrupted by a signal
fn xioctl<T>(fd: RawFd, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
    loop {
        let result = unsafe { libc::ioctl(fd, request as _, arg as *mut T) };
        if result >= 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn driver_error(request: &'static str, source: io::Error) -> BackendError {
    BackendError::DriverProtocol { request, source }
}

/// An open V4L2 video-capture node
pub struct V4l2Device {
    dev: Device,
    path: PathBuf,
}

impl V4l2Device {
    /// Open a capture node and check it supports streaming capture
    pub fn open(path: &Path) -> BackendResult<Self> {
        let dev = Device::with_path(path).map_err(|e| {
            BackendError::DeviceUnavailable(format!("{}: {}", path.display(), e))
        })?;

        let caps = dev.query_caps().map_err(|e| driver_error("VIDIOC_QUERYCAP", e))?;
        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
            return Err(BackendError::DeviceUnavailable(format!(
                "{} is not a video capture device",
                path.display()
            )));
        }
        if !caps.capabilities.contains(Flags::STREAMING) {
            return Err(BackendError::DeviceUnavailable(format!(
                "{} does not support streaming I/O",
                path.display()
            )));
        }

        info!(path = %path.display(), driver = %caps.driver, card = %caps.card, "Opened capture node");

        Ok(Self {
            dev,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every discrete format, size and frame-rate combination the node offers
    pub fn supported_profiles(&self) -> BackendResult<Vec<StreamProfile>> {
        let formats = self
            .dev
            .enum_formats()
            .map_err(|e| driver_error("VIDIOC_ENUM_FMT", e))?;

        let mut profiles = Vec::new();
        for desc in formats {
            if desc.fourcc.repr == [0; 4] {
                warn!(description = %desc.description, "Skipping format with empty fourcc");
                continue;
            }
            let code = String::from_utf8_lossy(&desc.fourcc.repr).to_string();

            let Ok(sizes) = self.dev.enum_framesizes(desc.fourcc) else {
                continue;
            };
            for size in sizes {
                let FrameSizeEnum::Discrete(discrete) = size.size else {
                    debug!(format = %code, "Skipping stepwise frame sizes");
                    continue;
                };
                let Ok(intervals) =
                    self.dev
                        .enum_frameintervals(desc.fourcc, discrete.width, discrete.height)
                else {
                    continue;
                };
                for interval in intervals {
                    if let FrameIntervalEnum::Discrete(frac) = interval.interval
                        && frac.numerator > 0
                    {
                        profiles.push(StreamProfile::new(
                            discrete.width,
                            discrete.height,
                            &code,
                            frac.denominator / frac.numerator,
                        ));
                    }
                }
            }
        }

        debug!(path = %self.path.display(), count = profiles.len(), "Enumerated profiles");
        Ok(profiles)
    }
}

impl VideoDevice for V4l2Device {
    fn fd(&self) -> RawFd {
        self.dev.handle().fd()
    }

    fn set_format(&self, profile: &StreamProfile) -> BackendResult<usize> {
        let requested = Format::new(profile.width, profile.height, FourCC::new(&profile.fourcc()));
        let actual = self
            .dev
            .set_format(&requested)
            .map_err(|e| driver_error("VIDIOC_S_FMT", e))?;

        if actual.width != requested.width
            || actual.height != requested.height
            || actual.fourcc != requested.fourcc
        {
            return Err(driver_error(
                "VIDIOC_S_FMT",
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "driver selected {}x{} {} instead of {}",
                        actual.width, actual.height, actual.fourcc, profile
                    ),
                ),
            ));
        }

        debug!(profile = %profile, size = actual.size, "Format set");
        Ok(actual.size as usize)
    }

    fn set_frame_rate(&self, frame_rate: u32) -> BackendResult<()> {
        self.dev
            .set_params(&Parameters::with_fps(frame_rate))
            .map_err(|e| driver_error("VIDIOC_S_PARM", e))?;
        Ok(())
    }

    fn request_buffers(&self, count: u32, mode: BackingMode) -> BackendResult<u32> {
        let mut req = V4l2RequestBuffers {
            count,
            type_: V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: memory_type(mode),
            capabilities: 0,
            flags: 0,
            reserved: [0; 3],
        };
        xioctl(self.fd(), VIDIOC_REQBUFS, &mut req).map_err(|e| driver_error("VIDIOC_REQBUFS", e))?;
        debug!(requested = count, granted = req.count, "Buffers requested");
        Ok(req.count)
    }

    fn query_buffer(&self, index: u32, mode: BackingMode) -> BackendResult<BufferInfo> {
        let mut buf = V4l2Buffer::new(index, mode);
        xioctl(self.fd(), VIDIOC_QUERYBUF, &mut buf)
            .map_err(|e| driver_error("VIDIOC_QUERYBUF", e))?;
        Ok(BufferInfo {
            index,
            length: buf.length as usize,
            // SAFETY: offset is the member QUERYBUF fills for both memory types
            offset: unsafe { buf.m.offset },
        })
    }

    fn map_buffer(&self, info: &BufferInfo) -> BackendResult<BufferMemory> {
        BufferMemory::map(self.fd(), info.offset, info.length).map_err(|e| driver_error("mmap", e))
    }

    fn queue_buffer(
        &self,
        index: u32,
        memory: &BufferMemory,
        mode: BackingMode,
    ) -> BackendResult<()> {
        let mut buf = V4l2Buffer::new(index, mode);
        if mode == BackingMode::UserAllocated {
            buf.m.userptr = memory.as_ptr() as libc::c_ulong;
            buf.length = memory.len() as u32;
        }
        xioctl(self.fd(), VIDIOC_QBUF, &mut buf).map_err(|e| driver_error("VIDIOC_QBUF", e))
    }

    fn dequeue_buffer(&self, mode: BackingMode) -> BackendResult<Option<Dequeued>> {
        let mut buf = V4l2Buffer::new(0, mode);
        match xioctl(self.fd(), VIDIOC_DQBUF, &mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(driver_error("VIDIOC_DQBUF", e)),
        }
        let timestamp = Duration::from_secs(buf.timestamp.tv_sec.max(0) as u64)
            + Duration::from_micros(buf.timestamp.tv_usec.max(0) as u64);
        Ok(Some(Dequeued {
            index: buf.index,
            bytes_used: buf.bytesused as usize,
            sequence: buf.sequence,
            timestamp,
        }))
    }

    fn stream_on(&self) -> BackendResult<()> {
        let mut buf_type: libc::c_int = V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        xioctl(self.fd(), VIDIOC_STREAMON, &mut buf_type)
            .map_err(|e| driver_error("VIDIOC_STREAMON", e))
    }

    fn stream_off(&self) -> BackendResult<()> {
        let mut buf_type: libc::c_int = V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        xioctl(self.fd(), VIDIOC_STREAMOFF, &mut buf_type)
            .map_err(|e| driver_error("VIDIOC_STREAMOFF", e))
    }
}
