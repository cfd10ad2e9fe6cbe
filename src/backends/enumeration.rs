// SPDX-License-Identifier: GPL-3.0-only

//! sysfs device enumeration
//!
//! Kernel node names (`video2`, `iio:device5`) change between boots and
//! replugs. The USB topology path `busnum-devpath-devnum`, found by walking
//! up the sysfs tree from a node, does not, so it is the key used to group a
//! camera's video nodes, sensors and control interface into one physical
//! device.
//!
//! Each walk is a lazy iterator over a sorted snapshot of directory names;
//! entries are resolved one at a time as the iterator advances. Creating a
//! new iterator restarts the walk.

use crate::backends::sysfs;
use crate::config::BackendConfig;
use crate::constants::{
    CUSTOM_SENSOR_ID, CUSTOM_SENSOR_PREFIX, HID_CUSTOM_DIR, IIO_DEVICE_PREFIX, IIO_DEVICES_DIR,
    MAX_DEV_PARENT_DIR, USB_DEVICES_DIR, UVC_MODULE, V4L_CLASS_DIR,
};
use crate::errors::{BackendError, BackendResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Stable `busnum-devpath-devnum` identifier of a USB device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TopologyPath(String);

impl TopologyPath {
    pub fn new(busnum: &str, devpath: &str, devnum: &str) -> Self {
        Self(format!("{}-{}-{}", busnum, devpath, devnum))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopologyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// USB attributes found by walking up from a kernel node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbTopology {
    pub busnum: String,
    pub devnum: String,
    pub devpath: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    /// First `bInterfaceNumber` passed on the way up
    pub interface_index: Option<u32>,
    /// Directory of the USB device itself
    pub device_dir: PathBuf,
}

impl UsbTopology {
    /// Walk from `start` towards the root, at most `max_hops` directories
    ///
    /// With `require_ids` the device directory must also carry `idVendor`,
    /// `idProduct` and `dev`. Returns `None` if no directory within the hop
    /// bound qualifies.
    pub fn resolve(start: &Path, max_hops: usize, require_ids: bool) -> Option<Self> {
        let mut dir = fs::canonicalize(start).ok()?;
        let mut interface_index = None;

        for _ in 0..max_hops {
            if interface_index.is_none() {
                interface_index = sysfs::read_optional(&dir.join("bInterfaceNumber"))
                    .and_then(|s| u32::from_str_radix(&s, 16).ok());
            }

            if let Some(found) = Self::read_device(&dir, require_ids) {
                return Some(Self {
                    interface_index,
                    ..found
                });
            }

            if !dir.pop() {
                break;
            }
        }
        None
    }

    fn read_device(dir: &Path, require_ids: bool) -> Option<Self> {
        let busnum = sysfs::read_optional(&dir.join("busnum"))?;
        let devnum = sysfs::read_optional(&dir.join("devnum"))?;
        let devpath = sysfs::read_optional(&dir.join("devpath"))?;
        let vendor = sysfs::read_optional(&dir.join("idVendor"));
        let product = sysfs::read_optional(&dir.join("idProduct"));
        if require_ids && (vendor.is_none() || product.is_none() || !dir.join("dev").exists()) {
            return None;
        }
        Some(Self {
            busnum,
            devnum,
            devpath,
            vendor_id: vendor.and_then(|v| u16::from_str_radix(&v, 16).ok()),
            product_id: product.and_then(|p| u16::from_str_radix(&p, 16).ok()),
            interface_index: None,
            device_dir: dir.to_path_buf(),
        })
    }

    pub fn topology_path(&self) -> TopologyPath {
        TopologyPath::new(&self.busnum, &self.devpath, &self.devnum)
    }
}

/// Identity of one interface of a physical device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface_index: Option<u32>,
    pub topology_path: TopologyPath,
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} at {}",
            self.vendor_id, self.product_id, self.topology_path
        )?;
        if let Some(mi) = self.interface_index {
            write!(f, " (interface {})", mi)?;
        }
        Ok(())
    }
}

/// Parse `usb:vXXXXpYYYY...` into vendor and product ids
pub fn parse_modalias(modalias: &str) -> Option<(u16, u16)> {
    if modalias.len() < 14 || !modalias.starts_with("usb:v") || modalias.as_bytes()[9] != b'p' {
        return None;
    }
    let vendor = u16::from_str_radix(modalias.get(5..9)?, 16).ok()?;
    let product = u16::from_str_radix(modalias.get(10..14)?, 16).ok()?;
    Some((vendor, product))
}

/// Whether the UVC driver is loaded and live
pub fn uvc_module_loaded(proc_root: &Path) -> bool {
    let Ok(modules) = fs::read_to_string(proc_root.join("modules")) else {
        return false;
    };
    modules
        .lines()
        .any(|line| line.starts_with(UVC_MODULE) && line.contains(" - Live"))
}

// ===== Video nodes =====

/// A UVC video capture node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoNode {
    /// Kernel name, e.g. `video0`
    pub name: String,
    pub dev_path: PathBuf,
    pub sysfs_path: PathBuf,
    pub identity: DeviceIdentity,
}

/// Lazy walk over `class/video4linux`
#[derive(Debug, Clone)]
pub struct VideoNodes {
    sys_root: PathBuf,
    dev_root: PathBuf,
    names: std::vec::IntoIter<String>,
}

impl VideoNodes {
    /// Start a walk; fails if the UVC driver is not loaded
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        if !uvc_module_loaded(&config.proc_root) {
            return Err(BackendError::DeviceUnavailable(format!(
                "{} kernel module is not loaded",
                UVC_MODULE
            )));
        }
        let class_dir = config.sys_root.join(V4L_CLASS_DIR);
        Ok(Self {
            sys_root: config.sys_root.clone(),
            dev_root: config.dev_root.clone(),
            names: sysfs::sorted_entries(&class_dir).into_iter(),
        })
    }

    fn resolve(&self, name: &str) -> Option<VideoNode> {
        let class_path = self.sys_root.join(V4L_CLASS_DIR).join(name);
        let real_path = fs::canonicalize(&class_path).unwrap_or_else(|_| class_path.clone());
        if real_path.to_string_lossy().contains("virtual") {
            debug!(name, "Skipping virtual video device");
            return None;
        }

        let dev_path = self.dev_root.join(name);
        if !dev_path.exists() {
            info!(name, "Not a USB video device: no device node");
            return None;
        }

        let device_dir = class_path.join("device");
        let Some(topology) = UsbTopology::resolve(&device_dir, MAX_DEV_PARENT_DIR, false) else {
            warn!(path = %device_dir.display(), "Failed to read busnum/devnum");
            return None;
        };

        let Some((vendor_id, product_id)) = sysfs::read_optional(&device_dir.join("modalias"))
            .as_deref()
            .and_then(parse_modalias)
        else {
            info!(name, "Not a USB video device: no usb modalias");
            return None;
        };

        let Some(interface_index) = sysfs::read_optional(&device_dir.join("bInterfaceNumber"))
            .and_then(|s| u32::from_str_radix(&s, 16).ok())
        else {
            info!(name, "Not a USB video device: no interface number");
            return None;
        };

        Some(VideoNode {
            name: name.to_string(),
            dev_path,
            sysfs_path: real_path,
            identity: DeviceIdentity {
                vendor_id,
                product_id,
                interface_index: Some(interface_index),
                topology_path: topology.topology_path(),
            },
        })
    }
}

impl Iterator for VideoNodes {
    type Item = VideoNode;

    fn next(&mut self) -> Option<VideoNode> {
        loop {
            let name = self.names.next()?;
            if let Some(node) = self.resolve(&name) {
                return Some(node);
            }
        }
    }
}

// ===== Sensor nodes =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SensorKind {
    Iio,
    Custom,
}

/// An IIO or custom HID sensor directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorNode {
    pub kind: SensorKind,
    /// Sensor name (`name` attribute, or `custom`)
    pub name: String,
    pub sysfs_path: PathBuf,
    pub identity: DeviceIdentity,
}

/// Lazy walk over IIO devices, then custom HID sensors
#[derive(Debug, Clone)]
pub struct SensorNodes {
    entries: std::vec::IntoIter<(SensorKind, PathBuf)>,
}

impl SensorNodes {
    pub fn new(config: &BackendConfig) -> Self {
        let iio_dir = config.sys_root.join(IIO_DEVICES_DIR);
        let custom_dir = config.sys_root.join(HID_CUSTOM_DIR);

        let iio = sysfs::sorted_entries(&iio_dir)
            .into_iter()
            .filter(|n| n.starts_with(IIO_DEVICE_PREFIX))
            .map(|n| (SensorKind::Iio, iio_dir.join(n)));
        let custom = sysfs::sorted_entries(&custom_dir)
            .into_iter()
            .filter(|n| n.contains(CUSTOM_SENSOR_PREFIX))
            .map(|n| (SensorKind::Custom, custom_dir.join(n)));

        Self {
            entries: iio.chain(custom).collect::<Vec<_>>().into_iter(),
        }
    }

    fn resolve(kind: SensorKind, path: &Path) -> Option<SensorNode> {
        let Some(topology) = UsbTopology::resolve(path, MAX_DEV_PARENT_DIR, true) else {
            warn!(path = %path.display(), "Failed to read busnum/devnum");
            return None;
        };
        let sysfs_path = fs::canonicalize(path).ok()?;
        let name = match kind {
            SensorKind::Iio => sysfs::read_optional(&sysfs_path.join("name")).unwrap_or_default(),
            SensorKind::Custom => CUSTOM_SENSOR_ID.to_string(),
        };

        Some(SensorNode {
            kind,
            name,
            sysfs_path,
            identity: DeviceIdentity {
                vendor_id: topology.vendor_id.unwrap_or_default(),
                product_id: topology.product_id.unwrap_or_default(),
                interface_index: topology.interface_index,
                topology_path: topology.topology_path(),
            },
        })
    }
}

impl Iterator for SensorNodes {
    type Item = SensorNode;

    fn next(&mut self) -> Option<SensorNode> {
        loop {
            let (kind, path) = self.entries.next()?;
            if let Some(node) = Self::resolve(kind, &path) {
                return Some(node);
            }
        }
    }
}

// ===== USB control interfaces =====

/// The vendor command interface of a USB device
///
/// Only located here; the request/response exchange is not part of this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlInterface {
    pub sysfs_path: PathBuf,
    pub identity: DeviceIdentity,
}

/// Lazy walk over `bus/usb/devices`, skipping root hubs and interfaces
#[derive(Debug, Clone)]
pub struct UsbControlInterfaces {
    usb_dir: PathBuf,
    names: std::vec::IntoIter<String>,
}

impl UsbControlInterfaces {
    pub fn new(config: &BackendConfig) -> Self {
        let usb_dir = config.sys_root.join(USB_DEVICES_DIR);
        let names = sysfs::sorted_entries(&usb_dir)
            .into_iter()
            .filter(|n| !n.starts_with("usb") && !n.contains(':'))
            .collect::<Vec<_>>();
        Self {
            usb_dir,
            names: names.into_iter(),
        }
    }

    fn resolve(&self, name: &str) -> Option<ControlInterface> {
        let path = fs::canonicalize(self.usb_dir.join(name)).ok()?;
        let topology = UsbTopology::resolve(&path, 1, false)?;
        let interfaces: u32 = sysfs::read_optional(&path.join("bNumInterfaces"))?
            .parse()
            .ok()?;
        if interfaces == 0 {
            return None;
        }

        Some(ControlInterface {
            identity: DeviceIdentity {
                vendor_id: topology.vendor_id?,
                product_id: topology.product_id?,
                // The hardware monitor interface is the last one
                interface_index: Some(interfaces - 1),
                topology_path: topology.topology_path(),
            },
            sysfs_path: path,
        })
    }
}

impl Iterator for UsbControlInterfaces {
    type Item = ControlInterface;

    fn next(&mut self) -> Option<ControlInterface> {
        loop {
            let name = self.names.next()?;
            if let Some(control) = self.resolve(&name) {
                return Some(control);
            }
        }
    }
}

// ===== Physical devices =====

/// Every kernel node belonging to one USB device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhysicalDevice {
    pub topology_path: TopologyPath,
    pub video: Vec<VideoNode>,
    pub sensors: Vec<SensorNode>,
    pub control: Option<ControlInterface>,
}

impl PhysicalDevice {
    fn new(topology_path: TopologyPath) -> Self {
        Self {
            topology_path,
            video: Vec::new(),
            sensors: Vec::new(),
            control: None,
        }
    }
}

/// Group video nodes, sensors and control interfaces by topology path
///
/// Control interfaces are only attached to devices that have a video node
/// or a sensor. A missing UVC driver leaves the video list empty.
pub fn physical_devices(config: &BackendConfig) -> Vec<PhysicalDevice> {
    let mut devices: BTreeMap<TopologyPath, PhysicalDevice> = BTreeMap::new();

    match VideoNodes::new(config) {
        Ok(nodes) => {
            for node in nodes {
                devices
                    .entry(node.identity.topology_path.clone())
                    .or_insert_with_key(|k| PhysicalDevice::new(k.clone()))
                    .video
                    .push(node);
            }
        }
        Err(e) => warn!(error = %e, "Skipping video enumeration"),
    }

    for node in SensorNodes::new(config) {
        devices
            .entry(node.identity.topology_path.clone())
            .or_insert_with_key(|k| PhysicalDevice::new(k.clone()))
            .sensors
            .push(node);
    }

    for control in UsbControlInterfaces::new(config) {
        if let Some(device) = devices.get_mut(&control.identity.topology_path) {
            device.control = Some(control);
        }
    }

    devices.into_values().collect()
}
