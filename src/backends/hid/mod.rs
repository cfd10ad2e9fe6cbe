// SPDX-License-Identifier: GPL-3.0-only

//! HID motion sensors over IIO and `hid_sensor_custom`
//!
//! - [`channel`]: per-channel layout descriptors
//! - [`scan`]: scan packing and sample decoding
//! - [`iio`] / [`custom`]: the two sensor families
//! - [`capture`]: the per-sensor capture loop
//! - [`device`]: a physical device grouping its sensors

pub mod capture;
pub mod channel;
pub mod custom;
pub mod device;
pub mod iio;
pub mod scan;

pub use capture::{HidSensor, SampleCallback, SampleDecoder, SensorDriver, SensorSample};
pub use channel::{ChannelDescriptor, ScanType};
pub use custom::{CustomSensor, ReportField};
pub use device::{HidDevice, HidProfile};
pub use iio::IioSensor;
pub use scan::{ChannelValue, SampleRecord, ScanLayout, pack_offsets};
