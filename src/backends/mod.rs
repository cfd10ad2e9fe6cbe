// SPDX-License-Identifier: GPL-3.0-only

//! Linux capture backend for depth cameras
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │                 LinuxBackend                    │
//! └──────┬──────────────────┬───────────────┬──────┘
//!        │                  │               │
//! ┌──────┴──────┐   ┌───────┴──────┐  ┌─────┴──────┐
//! │ enumeration │   │    video     │  │    hid     │
//! │   (sysfs)   │   │ (V4L2 ioctl) │  │ (IIO/HID)  │
//! └─────────────┘   └───────┬──────┘  └─────┬──────┘
//!                           └───────┬───────┘
//!                           ┌───────┴───────┐
//!                           │  frame_loop   │
//!                           │   + cancel    │
//!                           └───────────────┘
//! ```
//!
//! - [`enumeration`]: locate video nodes, sensors and control interfaces
//! - [`video`]: buffer pool and capture session over a V4L2 node
//! - [`hid`]: IIO and custom HID sensor capture
//! - [`frame_loop`] / [`cancel`]: the shared capture thread and its wakeup
//! - [`notification`]: asynchronous stream health reports

pub mod cancel;
pub mod enumeration;
pub mod frame_loop;
pub mod hid;
pub mod notification;
pub mod sysfs;
pub mod video;

use crate::config::BackendConfig;
use crate::errors::{BackendError, BackendResult};
use enumeration::{
    DeviceIdentity, PhysicalDevice, SensorNodes, UsbControlInterfaces, VideoNode, VideoNodes,
};
use hid::HidDevice;
use std::collections::BTreeSet;
use tracing::debug;
use video::CaptureSession;

/// Entry point: enumerate devices and open them
#[derive(Debug, Clone, Default)]
pub struct LinuxBackend {
    config: BackendConfig,
}

impl LinuxBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Lazy walk over UVC video nodes
    pub fn video_nodes(&self) -> BackendResult<VideoNodes> {
        VideoNodes::new(&self.config)
    }

    /// Lazy walk over IIO and custom HID sensors
    pub fn sensor_nodes(&self) -> SensorNodes {
        SensorNodes::new(&self.config)
    }

    /// Lazy walk over USB control interfaces
    pub fn control_interfaces(&self) -> UsbControlInterfaces {
        UsbControlInterfaces::new(&self.config)
    }

    /// Identities of every UVC video node
    pub fn enumerate_video_devices(&self) -> BackendResult<Vec<DeviceIdentity>> {
        Ok(self.video_nodes()?.map(|node| node.identity).collect())
    }

    /// One identity per physical device carrying sensors
    pub fn enumerate_sensor_devices(&self) -> Vec<DeviceIdentity> {
        let mut seen = BTreeSet::new();
        self.sensor_nodes()
            .filter(|node| seen.insert(node.identity.topology_path.clone()))
            .map(|node| node.identity)
            .collect()
    }

    /// Every physical device with its nodes grouped by topology path
    pub fn physical_devices(&self) -> Vec<PhysicalDevice> {
        enumeration::physical_devices(&self.config)
    }

    /// Find the video node currently matching an identity
    pub fn find_video(&self, identity: &DeviceIdentity) -> BackendResult<VideoNode> {
        self.video_nodes()?
            .find(|node| &node.identity == identity)
            .ok_or_else(|| {
                BackendError::DeviceUnavailable(format!(
                    "video device {} is no longer connected",
                    identity
                ))
            })
    }

    /// Open a capture session on the video node matching `identity`
    pub fn open_video(&self, identity: &DeviceIdentity) -> BackendResult<CaptureSession> {
        let node = self.find_video(identity)?;
        debug!(node = %node.dev_path.display(), "Opening video node");
        CaptureSession::open(&node.dev_path, &self.config)
    }

    /// Open every sensor sharing the identity's topology path
    pub fn open_sensors(&self, identity: &DeviceIdentity) -> BackendResult<HidDevice> {
        let nodes: Vec<_> = self
            .sensor_nodes()
            .filter(|node| node.identity.topology_path == identity.topology_path)
            .collect();
        HidDevice::open(&nodes, &self.config)
    }
}
