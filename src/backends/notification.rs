// SPDX-License-Identifier: GPL-3.0-only

//! Asynchronous reports from capture loops
//!
//! Loop threads never return errors to a caller. Non-fatal conditions and
//! fatal stream failures both reach the owner through a [`NotificationHandler`].

use std::fmt;
use std::sync::Arc;

/// Severity of an asynchronous notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Asynchronous report from a running capture loop
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A frame arrived shorter than the negotiated size and was dropped
    PartialFrame {
        bytes_used: usize,
        expected: usize,
        percentage: u32,
    },
    /// Every buffer is held by the frame callback and capture is stalled
    Backpressure { outstanding: usize },
    /// Streaming stopped because of an unrecoverable error
    StreamFailed { error: String },
}

impl Notification {
    pub fn severity(&self) -> Severity {
        match self {
            Notification::PartialFrame { .. } | Notification::Backpressure { .. } => {
                Severity::Warning
            }
            Notification::StreamFailed { .. } => Severity::Error,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::PartialFrame {
                bytes_used,
                expected,
                percentage,
            } => write!(
                f,
                "Incomplete frame detected! Size {} out of {} bytes ({}%)",
                bytes_used, expected, percentage
            ),
            Notification::Backpressure { outstanding } => write!(
                f,
                "All {} buffers are held by the frame callback; capture is stalled",
                outstanding
            ),
            Notification::StreamFailed { error } => write!(f, "Streaming failed: {}", error),
        }
    }
}

/// Receives asynchronous notifications; may be shared by several loops
pub type NotificationHandler = Arc<dyn Fn(Notification) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_frame_message() {
        let note = Notification::PartialFrame {
            bytes_used: 500,
            expected: 1000,
            percentage: 50,
        };
        assert_eq!(
            note.to_string(),
            "Incomplete frame detected! Size 500 out of 1000 bytes (50%)"
        );
        assert_eq!(note.severity(), Severity::Warning);
    }

    #[test]
    fn test_stream_failure_is_error() {
        let note = Notification::StreamFailed {
            error: "VIDIOC_DQBUF failed".into(),
        };
        assert_eq!(note.severity(), Severity::Error);
        assert!(note.to_string().contains("VIDIOC_DQBUF"));
    }
}
