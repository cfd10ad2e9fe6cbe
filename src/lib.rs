// SPDX-License-Identifier: GPL-3.0-only

//! depthcam - Linux capture backend for depth cameras
//!
//! Streams video from UVC nodes through the V4L2 streaming interface and
//! motion samples from HID sensors exposed through IIO, and enumerates
//! both by their stable USB topology path.
//!
//! - [`backends`]: device enumeration, video capture and HID sensor capture
//! - [`config`]: backend configuration
//! - [`constants`]: kernel interface constants
//! - [`errors`]: error types

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;

// Re-export commonly used types
pub use backends::LinuxBackend;
pub use backends::enumeration::{DeviceIdentity, PhysicalDevice, TopologyPath};
pub use backends::hid::{HidDevice, HidProfile, SensorSample};
pub use backends::notification::{Notification, NotificationHandler, Severity};
pub use backends::video::{BackingMode, CaptureSession, CaptureState, Frame, StreamProfile};
pub use config::BackendConfig;
pub use errors::{BackendError, BackendResult};
