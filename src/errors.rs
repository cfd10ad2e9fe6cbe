// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture backend
//!
//! Synchronous failures are returned as [`BackendError`] from the call that
//! failed. Steady-state streaming problems never surface here; they arrive
//! asynchronously as [`crate::backends::notification::Notification`]s.

use std::io;
use std::path::PathBuf;

/// Result type alias using BackendError
pub type BackendResult<T> = Result<T, BackendError>;

/// Main backend error type
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Operation is not valid in the current session state
    #[error("{operation} is not valid while the session is {state}")]
    Sequence {
        operation: &'static str,
        state: &'static str,
    },

    /// Open or claim of a device failed, including after bounded retry
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A required kernel control request failed unexpectedly
    #[error("{request} failed: {source}")]
    DriverProtocol {
        request: &'static str,
        #[source]
        source: io::Error,
    },

    /// The driver granted fewer buffers than streaming needs
    #[error("Insufficient buffer memory: driver granted {granted} buffers")]
    InsufficientBuffers { granted: u32 },

    /// A sysfs attribute could not be read or written
    #[error("Sysfs attribute {}: {source}", path.display())]
    Sysfs {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No sensor with this name belongs to the device
    #[error("Sensor {0} not found")]
    SensorNotFound(String),

    /// A sensor has no enabled scan channels to stream
    #[error("Sensor {0} has no enabled channels")]
    NoEnabledChannels(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BackendError {
    /// Wrap an I/O error on a sysfs attribute
    pub fn sysfs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        BackendError::Sysfs {
            path: path.into(),
            source,
        }
    }
}

/// A single scan channel whose layout metadata could not be used
///
/// The channel is dropped and sensor initialization continues.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelParseError {
    /// `in_<name>_type` does not follow `[bl]e:[su]BITS/STORAGE>>SHIFT`
    #[error("Channel {channel}: unparsable scan type {text:?}")]
    ScanType { channel: String, text: String },

    /// `in_<name>_index` is not an unsigned integer
    #[error("Channel {channel}: unparsable scan index {text:?}")]
    Index { channel: String, text: String },

    /// `in_<name>_en` is not an integer
    #[error("Channel {channel}: unparsable enable flag {text:?}")]
    Enabled { channel: String, text: String },

    /// One of the channel attribute files is missing or unreadable
    #[error("Channel {channel}: cannot read {attribute}: {reason}")]
    Unreadable {
        channel: String,
        attribute: String,
        reason: String,
    },
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_error_message() {
        let err = BackendError::Sequence {
            operation: "configure",
            state: "streaming",
        };
        assert_eq!(
            err.to_string(),
            "configure is not valid while the session is streaming"
        );
    }

    #[test]
    fn test_driver_error_keeps_source() {
        let err = BackendError::DriverProtocol {
            request: "VIDIOC_STREAMON",
            source: io::Error::from_raw_os_error(libc::EBUSY),
        };
        assert!(err.to_string().starts_with("VIDIOC_STREAMON failed"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
