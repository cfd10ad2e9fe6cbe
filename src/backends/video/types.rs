// SPDX-License-Identifier: GPL-3.0-only

//! Video capture types

use super::buffer::Frame;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A negotiated streaming profile
///
/// Immutable once committed to a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamProfile {
    pub width: u32,
    pub height: u32,
    /// Four-character pixel format code, e.g. `"Z16 "` or `"YUYV"`
    pub pixel_format: String,
    /// Frames per second
    pub frame_rate: u32,
}

impl StreamProfile {
    pub fn new(width: u32, height: u32, pixel_format: &str, frame_rate: u32) -> Self {
        Self {
            width,
            height,
            pixel_format: pixel_format.to_string(),
            frame_rate,
        }
    }

    /// Pixel format as the four raw bytes the driver expects
    ///
    /// Short codes are padded with spaces.
    pub fn fourcc(&self) -> [u8; 4] {
        let mut code = [b' '; 4];
        for (dst, src) in code.iter_mut().zip(self.pixel_format.bytes()) {
            *dst = src;
        }
        code
    }
}

impl fmt::Display for StreamProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} @ {}fps",
            self.width, self.height, self.pixel_format, self.frame_rate
        )
    }
}

/// Capture session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Configured,
    Streaming,
}

impl CaptureState {
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Configured => "configured",
            CaptureState::Streaming => "streaming",
        }
    }
}

/// How buffer memory is provided to the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackingMode {
    /// Kernel-allocated buffers mapped into the process
    Mapped,
    /// Process-allocated buffers with a trailing metadata block
    UserAllocated,
}

impl BackingMode {
    /// Whether buffers carry the trailing metadata block
    pub fn has_metadata(self) -> bool {
        matches!(self, BackingMode::UserAllocated)
    }
}

/// Receives frames from the poll loop
pub type FrameCallback = Box<dyn FnMut(&StreamProfile, Frame) + Send>;

/// Classification of a dequeued payload against the negotiated frame size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadCheck {
    Empty,
    Partial { percentage: u32 },
    Complete,
}

/// Classify a payload of `bytes_used` bytes against a full frame of `frame_size`
///
/// `frame_size` excludes any trailing metadata block.
pub fn classify_payload(bytes_used: usize, frame_size: usize) -> PayloadCheck {
    if bytes_used == 0 {
        PayloadCheck::Empty
    } else if bytes_used < frame_size {
        let percentage = (bytes_used as u64 * 100 / frame_size as u64) as u32;
        PayloadCheck::Partial { percentage }
    } else {
        PayloadCheck::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify_payload(0, 100), PayloadCheck::Empty);
        assert_eq!(
            classify_payload(1, 100),
            PayloadCheck::Partial { percentage: 1 }
        );
        assert_eq!(
            classify_payload(99, 100),
            PayloadCheck::Partial { percentage: 99 }
        );
        assert_eq!(classify_payload(100, 100), PayloadCheck::Complete);
        // Payload including the metadata block
        assert_eq!(classify_payload(356, 100), PayloadCheck::Complete);
    }

    #[test]
    fn test_fourcc_pads_short_codes() {
        let profile = StreamProfile::new(640, 480, "Z16", 30);
        assert_eq!(&profile.fourcc(), b"Z16 ");
        assert_eq!(profile.to_string(), "640x480 Z16 @ 30fps");
    }
}
