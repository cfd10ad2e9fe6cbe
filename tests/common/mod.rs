// SPDX-License-Identifier: GPL-3.0-only

//! Fake sysfs/dev/proc trees for integration tests

#![allow(dead_code)]

use depthcam::BackendConfig;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct Fixture {
    dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let fixture = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        for sub in ["sys", "dev", "proc"] {
            fs::create_dir_all(fixture.root().join(sub)).unwrap();
        }
        fixture
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn sys(&self) -> PathBuf {
        self.root().join("sys")
    }

    pub fn config(&self) -> BackendConfig {
        let mut config = BackendConfig::with_root(self.root());
        config.open_retries = 2;
        config.open_retry_delay_ms = 1;
        config.poll_timeout_ms = 200;
        config
    }

    /// Write a file, creating parent directories
    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.root().join(rel)).unwrap()
    }

    pub fn link(&self, target_rel: &str, link_rel: &str) {
        let link = self.root().join(link_rel);
        fs::create_dir_all(link.parent().unwrap()).unwrap();
        symlink(self.root().join(target_rel), link).unwrap();
    }

    pub fn load_uvc(&self) {
        self.write(
            "proc/modules",
            "videodev 311296 2 uvcvideo, Live 0x0000000000000000\n\
             uvcvideo 135168 0 - Live 0x0000000000000000\n",
        );
    }

    /// A USB device directory at `sys/devices/<usb_rel>`
    pub fn usb_device(&self, usb_rel: &str, busnum: u32, devpath: &str, devnum: u32) -> String {
        let base = format!("sys/devices/{}", usb_rel);
        self.write(&format!("{}/busnum", base), &format!("{}\n", busnum));
        self.write(&format!("{}/devnum", base), &format!("{}\n", devnum));
        self.write(&format!("{}/devpath", base), &format!("{}\n", devpath));
        self.write(&format!("{}/idVendor", base), "8086\n");
        self.write(&format!("{}/idProduct", base), "0b3a\n");
        self.write(&format!("{}/dev", base), "189:3\n");
        self.write(&format!("{}/bNumInterfaces", base), " 6\n");
        base
    }

    /// A UVC video node under a USB interface of `device_base`
    pub fn video_node(&self, device_base: &str, interface: &str, name: &str, mi: u32) {
        let intf = format!("{}/{}", device_base, interface);
        self.write(
            &format!("{}/modalias", intf),
            "usb:v8086p0B3Ad5010dcEFdsc02dp01ic0Eisc01ip00in00\n",
        );
        self.write(&format!("{}/bInterfaceNumber", intf), &format!("{:02x}\n", mi));
        let node = format!("{}/video4linux/{}", intf, name);
        self.write(&format!("{}/name", node), "Intel(R) RealSense(TM) Depth Camera\n");
        symlink(self.root().join(&intf), self.root().join(&node).join("device")).unwrap();
        self.link(&node, &format!("sys/class/video4linux/{}", name));
        self.write(&format!("dev/{}", name), "");
    }

    /// An IIO accelerometer with x/y/z channels and a timestamp
    pub fn iio_accel(&self, device_base: &str, number: u32) -> String {
        let name = format!("iio:device{}", number);
        let iio = format!(
            "{}/1-2:1.5/0003:8086:0B3A.0001/HID-SENSOR-200073.3.auto/{}",
            device_base, name
        );
        self.write(&format!("{}/name", iio), "accel_3d\n");
        self.write(&format!("{}/in_accel_sampling_frequency", iio), "0\n");
        self.write(&format!("{}/buffer/length", iio), "0\n");
        self.write(&format!("{}/buffer/enable", iio), "0\n");
        for (index, axis) in ["x", "y", "z"].iter().enumerate() {
            let stem = format!("{}/scan_elements/in_accel_{}", iio, axis);
            self.write(&format!("{}_en", stem), "0\n");
            self.write(&format!("{}_index", stem), &format!("{}\n", index));
            self.write(&format!("{}_type", stem), "le:s32/32>>0\n");
        }
        let ts = format!("{}/scan_elements/in_timestamp", iio);
        self.write(&format!("{}_en", ts), "0\n");
        self.write(&format!("{}_index", ts), "3\n");
        self.write(&format!("{}_type", ts), "le:s64/64>>0\n");

        self.link(&iio, &format!("sys/bus/iio/devices/{}", name));
        self.write(&format!("dev/{}", name), "");
        iio
    }

    /// A custom HID sensor with one feature report
    pub fn custom_sensor(&self, device_base: &str) -> String {
        let name = "HID-SENSOR-2000e1.6.auto";
        let sensor = format!("{}/1-2:1.5/0003:8086:0B3A.0001/{}", device_base, name);
        self.write(&format!("{}/enable_sensor", sensor), "0\n");
        self.write(
            &format!("{}/feature-0-200309/feature-0-200309-name", sensor),
            "custom-value\n",
        );
        self.write(
            &format!("{}/feature-0-200309/feature-0-200309-value", sensor),
            "42\n",
        );
        self.link(
            &sensor,
            &format!("sys/bus/platform/drivers/hid_sensor_custom/{}", name),
        );
        self.write(&format!("dev/{}", name), "");
        sensor
    }

    /// Register a USB device under `bus/usb/devices`
    pub fn usb_bus_entry(&self, device_base: &str, name: &str) {
        self.link(device_base, &format!("sys/bus/usb/devices/{}", name));
    }
}
