// SPDX-License-Identifier: GPL-3.0-only

//! Backend-wide constants
//!
//! Fixed protocol numbers shared by the video capture path, the HID sensor
//! path and the sysfs device enumerator.

use std::time::Duration;

// ===== Video capture =====

/// Size of the trailing metadata block appended to user-allocated buffers
pub const META_DATA_SIZE: usize = 256;

/// Fewest kernel buffers a streaming profile can run with
pub const MIN_BUFFER_COUNT: u32 = 2;

/// Default number of kernel buffers requested on configure
pub const DEFAULT_BUFFER_COUNT: u32 = 4;

/// Readiness wait bound for the video poll loop and the HID capture loop
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

// ===== HID / IIO sensors =====

/// Size of the metadata block trailing a scan when one is present
pub const HID_METADATA_SIZE: usize = 8;

/// Number of scans the kernel buffers per IIO device (`buffer/length`)
pub const HID_BUFFER_LENGTH: usize = 128;

/// Fixed record size of a custom HID sensor report
pub const CUSTOM_REPORT_SIZE: usize = 24;

/// Attempts made to open a sensor device node before giving up
pub const OPEN_RETRIES: u32 = 10;

/// Delay between two sensor device node open attempts
pub const OPEN_RETRY_DELAY: Duration = Duration::from_millis(5);

/// Name prefix of custom HID sensors bound to `hid_sensor_custom`
pub const CUSTOM_SENSOR_PREFIX: &str = "HID-SENSOR-2000e1";

/// Sensor family id reported for custom HID sensors
pub const CUSTOM_SENSOR_ID: &str = "custom";

// ===== Device topology =====

/// Maximum number of parent directories walked looking for USB topology
pub const MAX_DEV_PARENT_DIR: usize = 10;

/// Video4Linux class directory, relative to the sysfs root
pub const V4L_CLASS_DIR: &str = "class/video4linux";

/// IIO device directory, relative to the sysfs root
pub const IIO_DEVICES_DIR: &str = "bus/iio/devices";

/// Name prefix of IIO device directories
pub const IIO_DEVICE_PREFIX: &str = "iio:device";

/// Custom HID sensor driver directory, relative to the sysfs root
pub const HID_CUSTOM_DIR: &str = "bus/platform/drivers/hid_sensor_custom";

/// USB device directory, relative to the sysfs root
pub const USB_DEVICES_DIR: &str = "bus/usb/devices";

/// Kernel module that must be live for UVC enumeration
pub const UVC_MODULE: &str = "uvcvideo";
